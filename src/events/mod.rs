//! Events module for engine output
//!
//! Provides structured event types broadcast by the hotkey engine and the
//! activation dispatcher to every interested collaborator.

use serde::{Deserialize, Serialize};

use crate::bindings::{ComboId, ConflictReport, Target, TargetKind, TriggerType};

/// Events emitted by the engine and dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Key interception is active
    MonitoringStarted,

    /// Key interception was stopped on request
    MonitoringStopped,

    /// The OS disabled the event tap; all pending triggers were dropped
    MonitoringLost,

    /// A binding was resolved and handed to the dispatcher
    BindingFired {
        binding_id: String,
        trigger: TriggerType,
        target: Target,
    },

    /// A binding's target could not be activated
    BindingFailed {
        binding_id: String,
        kind: TargetKind,
        reason: String,
    },

    /// Cheatsheet overlay should be shown
    OverlayShown,

    /// Cheatsheet overlay should be hidden
    OverlayHidden,

    /// The quick-assign shortcut was pressed
    QuickAssignRequested {
        combo: ComboId,
    },

    /// The conflict set differs from the previous rebuild
    ConflictsChanged {
        conflicts: ConflictReport,
    },

    /// The registry was rebuilt
    BindingsReloaded {
        /// Number of indexed bindings, built-ins included
        count: usize,
    },
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::MonitoringStarted => write!(f, "MONITORING_STARTED"),
            EngineEvent::MonitoringStopped => write!(f, "MONITORING_STOPPED"),
            EngineEvent::MonitoringLost => write!(f, "MONITORING_LOST"),
            EngineEvent::BindingFired {
                binding_id,
                trigger,
                ..
            } => write!(f, "BINDING_FIRED ({binding_id}, {trigger})"),
            EngineEvent::BindingFailed {
                binding_id, reason, ..
            } => {
                write!(f, "BINDING_FAILED ({binding_id}: {reason})")
            }
            EngineEvent::OverlayShown => write!(f, "OVERLAY_SHOWN"),
            EngineEvent::OverlayHidden => write!(f, "OVERLAY_HIDDEN"),
            EngineEvent::QuickAssignRequested { combo } => {
                write!(f, "QUICK_ASSIGN_REQUESTED ({combo})")
            }
            EngineEvent::ConflictsChanged { conflicts } => write!(
                f,
                "CONFLICTS_CHANGED ({} bindings, {} built-ins)",
                conflicts.binding_ids.len(),
                conflicts.builtins.len()
            ),
            EngineEvent::BindingsReloaded { count } => write!(f, "BINDINGS_RELOADED ({count})"),
        }
    }
}
