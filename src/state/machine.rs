//! Trigger disambiguation state machine
//!
//! Resolves press, double-press, triple-press and hold for each combo.
//! A combo is Idle until a release (or a hold-capable press) creates its
//! `PressState`; the state is dropped as soon as the sequence resolves.
//!
//! Deadlines live in a `Scheduler` owned by the machine, so every timer is
//! tracked and cancelled together with the state that created it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::scheduler::{DueTask, Scheduler, TaskId};
use crate::bindings::{Binding, ComboId, ComboRegistry, TriggerType};

/// Default hold threshold and multi-press window
pub const DEFAULT_TRIGGER_WINDOW: Duration = Duration::from_millis(400);

/// Timing windows for trigger resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How long a combo must stay held to count as a hold
    pub hold_threshold: Duration,
    /// Maximum gap between releases of a multi-press sequence
    pub multi_press_window: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            hold_threshold: DEFAULT_TRIGGER_WINDOW,
            multi_press_window: DEFAULT_TRIGGER_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Hold,
    Decision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerPayload {
    pub combo: ComboId,
    pub kind: TimerKind,
}

/// Transient record of an undecided sequence
#[derive(Debug, Default)]
struct PressState {
    count: u8,
    last_release: Option<Instant>,
    decision: Option<TaskId>,
    hold: Option<TaskId>,
    hold_fired: bool,
}

/// A resolved trigger: every binding registered for `(combo, trigger)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub combo: ComboId,
    pub trigger: TriggerType,
    pub bindings: Vec<Binding>,
}

/// Per-combo press-count and hold resolution
#[derive(Debug)]
pub struct TriggerDisambiguator {
    timing: Timing,
    pending: HashMap<ComboId, PressState>,
    scheduler: Scheduler<TimerPayload>,
}

impl TriggerDisambiguator {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            pending: HashMap::new(),
            scheduler: Scheduler::new(),
        }
    }

    /// Number of combos with an undecided sequence
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Earliest hold or decision deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Remove every timer due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Vec<DueTask<TimerPayload>> {
        self.scheduler.pop_due(now)
    }

    /// Handle the active set becoming `combo` through a key press
    pub fn on_key_down(&mut self, combo: &ComboId, registry: &ComboRegistry, now: Instant) {
        if let Some(state) = self.pending.get_mut(combo) {
            state.hold_fired = false;
        }
        if !registry.has_trigger(combo, TriggerType::Hold) {
            return;
        }

        let state = self.pending.entry(combo.clone()).or_default();
        if let Some(id) = state.hold.take() {
            self.scheduler.cancel(id);
        }
        state.hold = Some(self.scheduler.schedule(
            now + self.timing.hold_threshold,
            TimerPayload {
                combo: combo.clone(),
                kind: TimerKind::Hold,
            },
        ));

        debug!(%combo, "hold timer started");
    }

    /// Handle a release while the active set was `combo`
    pub fn on_key_up(
        &mut self,
        combo: &ComboId,
        registry: &ComboRegistry,
        now: Instant,
    ) -> Option<Activation> {
        if let Some(state) = self.pending.get_mut(combo) {
            if state.hold_fired {
                debug!(%combo, "release after hold swallowed");
                self.clear(combo);
                return None;
            }
            if let Some(id) = state.hold.take() {
                self.scheduler.cancel(id);
            }
        }

        let max_count = registry
            .triggers(combo)
            .into_iter()
            .filter_map(TriggerType::press_count)
            .max();

        let Some(max_count) = max_count else {
            // Unbound, or hold-only and released early
            self.clear(combo);
            return None;
        };

        if max_count == 1 {
            self.clear(combo);
            return self.activation(combo, TriggerType::Press, registry);
        }

        let window = self.timing.multi_press_window;
        let state = self.pending.entry(combo.clone()).or_default();
        let continues_sequence = state
            .last_release
            .is_some_and(|last| now.saturating_duration_since(last) <= window);
        state.count = if continues_sequence {
            state.count.saturating_add(1)
        } else {
            1
        };
        state.last_release = Some(now);
        if let Some(id) = state.decision.take() {
            self.scheduler.cancel(id);
        }

        let count = state.count;
        trace!(%combo, count, "release counted");

        if count >= max_count {
            self.clear(combo);
            return self.resolve_count(combo, count, registry);
        }

        state.decision = Some(self.scheduler.schedule(
            now + window,
            TimerPayload {
                combo: combo.clone(),
                kind: TimerKind::Decision,
            },
        ));
        None
    }

    /// Resolve a due timer against the current active key set
    pub fn on_timer(
        &mut self,
        task: &DueTask<TimerPayload>,
        active: &ComboId,
        registry: &ComboRegistry,
    ) -> Option<Activation> {
        let combo = &task.payload.combo;
        let Some(state) = self.pending.get_mut(combo) else {
            trace!(%combo, "timer fired for idle combo");
            return None;
        };

        match task.payload.kind {
            TimerKind::Hold => {
                if state.hold != Some(task.id) {
                    return None;
                }
                state.hold = None;

                if active != combo {
                    debug!(%combo, %active, "hold abandoned, key set changed");
                    if state.decision.is_none() {
                        self.pending.remove(combo);
                    }
                    return None;
                }

                state.hold_fired = true;
                state.count = 0;
                state.last_release = None;
                if let Some(id) = state.decision.take() {
                    self.scheduler.cancel(id);
                }
                self.activation(combo, TriggerType::Hold, registry)
            }
            TimerKind::Decision => {
                if state.decision != Some(task.id) {
                    return None;
                }
                state.decision = None;
                let count = state.count;
                if state.hold.is_some() {
                    // The next press is still down; its hold timer stays armed
                    state.count = 0;
                    state.last_release = None;
                } else {
                    self.clear(combo);
                }
                self.resolve_count(combo, count, registry)
            }
        }
    }

    /// Forget fired holds whose keys are no longer all down
    pub fn release_stale_holds(&mut self, active: &ComboId) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|combo, state| !state.hold_fired || combo.is_subset_of(active));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            trace!(dropped, %active, "fired holds released");
        }
        dropped
    }

    /// Drop every pending sequence and timer
    pub fn cancel_all(&mut self) -> usize {
        let sequences = self.pending.len();
        let timers = self.scheduler.cancel_all();
        self.pending.clear();
        if sequences > 0 || timers > 0 {
            debug!(sequences, timers, "pending triggers cancelled");
        }
        sequences
    }

    fn clear(&mut self, combo: &ComboId) {
        if let Some(state) = self.pending.remove(combo) {
            for id in [state.hold, state.decision].into_iter().flatten() {
                self.scheduler.cancel(id);
            }
        }
    }

    fn resolve_count(
        &self,
        combo: &ComboId,
        count: u8,
        registry: &ComboRegistry,
    ) -> Option<Activation> {
        let trigger = TriggerType::from_press_count(count)?;
        self.activation(combo, trigger, registry)
    }

    fn activation(
        &self,
        combo: &ComboId,
        trigger: TriggerType,
        registry: &ComboRegistry,
    ) -> Option<Activation> {
        let bindings = registry.bindings_for(combo, trigger);
        if bindings.is_empty() {
            debug!(%combo, %trigger, "sequence resolved with no binding");
            return None;
        }
        Some(Activation {
            combo: combo.clone(),
            trigger,
            bindings,
        })
    }
}
