//! Binding conflict detection
//!
//! Groups every registered binding by `(ComboId, TriggerType)`. Any group
//! with more than one member is a conflict. Conflicts are a warning only:
//! all members of a conflicting group still fire together.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::model::{ComboId, SystemAction, TriggerType};
use super::registry::ComboRegistry;

/// A single conflicting `(combo, trigger)` group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub combo: ComboId,
    pub trigger: TriggerType,
    /// Ids of every binding in the group (always 2 or more)
    pub binding_ids: Vec<String>,
}

/// Flattened result exposed to collaborators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// User binding ids involved in any conflict
    pub binding_ids: BTreeSet<String>,
    /// Built-in shortcuts involved in any conflict
    pub builtins: BTreeSet<SystemAction>,
    /// Every conflicting group, ordered by combo then trigger
    #[serde(default)]
    pub groups: Vec<Conflict>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.binding_ids.is_empty() && self.builtins.is_empty()
    }

    pub fn is_conflicting(&self, binding_id: &str) -> bool {
        self.binding_ids.contains(binding_id)
    }
}

/// Groups bindings by combo and trigger
#[derive(Debug, Default)]
pub struct ConflictDetector {
    groups: HashMap<(ComboId, TriggerType), Vec<(String, Option<SystemAction>)>>,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every binding of a freshly built registry
    pub fn from_registry(registry: &ComboRegistry) -> Self {
        let mut detector = Self::new();
        for binding in registry.iter() {
            detector
                .groups
                .entry((binding.combo_id(), binding.trigger))
                .or_default()
                .push((binding.id.clone(), binding.system_action()));
        }
        detector
    }

    /// All groups with two or more members, sorted for stable output
    pub fn find_conflicts(&self) -> Vec<Conflict> {
        let mut conflicts: Vec<Conflict> = self
            .groups
            .iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|((combo, trigger), members)| Conflict {
                combo: combo.clone(),
                trigger: *trigger,
                binding_ids: {
                    let mut ids: Vec<String> = members.iter().map(|(id, _)| id.clone()).collect();
                    ids.sort();
                    ids
                },
            })
            .collect();
        conflicts.sort_by(|a, b| (&a.combo, a.trigger).cmp(&(&b.combo, b.trigger)));
        conflicts
    }

    /// Conflicting groups plus the flattened user ids and built-in flags
    pub fn report(&self) -> ConflictReport {
        let mut report = ConflictReport {
            groups: self.find_conflicts(),
            ..ConflictReport::default()
        };
        for members in self.groups.values().filter(|m| m.len() > 1) {
            for (id, action) in members {
                match action {
                    Some(action) => {
                        report.builtins.insert(*action);
                    }
                    None => {
                        report.binding_ids.insert(id.clone());
                    }
                }
            }
        }
        report
    }
}
