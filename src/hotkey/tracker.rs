//! Pressed-key state tracking
//!
//! Normalizes raw transitions into an authoritative set of held keys.
//! Normal and system keys are tracked in disjoint sets; their union is
//! cached as a `ComboId` so reading the active combo is O(1).

use std::collections::BTreeSet;

use tracing::trace;

use super::keys::{self, KeyTransition, TransitionKind};
use crate::bindings::{ComboId, SYSTEM_KEY_OFFSET};

/// An edge produced by applying a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyChange {
    /// A key went down; carries the active combo after the press
    Pressed(ComboId),
    /// A key went up; carries the active combo before the release
    Released(ComboId),
}

/// Tracks which keys are currently held
#[derive(Debug, Default)]
pub struct KeyStateTracker {
    normal: BTreeSet<u16>,
    system: BTreeSet<u16>,
    active: ComboId,
}

impl KeyStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current union of normal and system keys
    pub fn active(&self) -> &ComboId {
        &self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Forget every held key
    pub fn clear(&mut self) {
        self.normal.clear();
        self.system.clear();
        self.refresh();
    }

    /// Apply one raw transition and return the resulting edges in order
    pub fn apply(&mut self, transition: &KeyTransition) -> Vec<KeyChange> {
        let changes = match transition.kind {
            TransitionKind::Down => self.press_normal(transition.keycode).into_iter().collect(),
            TransitionKind::Up => self.release_normal(transition.keycode).into_iter().collect(),
            TransitionKind::FlagsChanged => self.flags_changed(transition),
            TransitionKind::SystemDefined => match transition.system {
                Some(event) if event.pressed => self.press_system(event.key).into_iter().collect(),
                Some(event) => self.release_system(event.key).into_iter().collect(),
                None => Vec::new(),
            },
        };
        trace!(?transition, active = %self.active, "key state updated");
        changes
    }

    fn flags_changed(&mut self, transition: &KeyTransition) -> Vec<KeyChange> {
        let code = transition.keycode;

        // Caps Lock only reports its toggle state, never a release. Treat each
        // flags change as a full tap so it can take part in combos without
        // sticking in the held set.
        if code == keys::keycode::CAPS_LOCK {
            let mut changes = Vec::with_capacity(2);
            changes.extend(self.press_normal(code));
            changes.extend(self.release_normal(code));
            return changes;
        }

        if self.normal.contains(&code) {
            return self.release_normal(code).into_iter().collect();
        }

        match keys::modifier_flag(code) {
            // The flag is clear, so this is a release of a key we never saw go down
            Some(mask) if transition.flags & mask == 0 => Vec::new(),
            _ => self.press_normal(code).into_iter().collect(),
        }
    }

    fn press_normal(&mut self, code: u16) -> Option<KeyChange> {
        if !self.normal.insert(code) {
            // auto-repeat
            return None;
        }
        self.refresh();
        Some(KeyChange::Pressed(self.active.clone()))
    }

    fn release_normal(&mut self, code: u16) -> Option<KeyChange> {
        if !self.normal.contains(&code) {
            return None;
        }
        let before = self.active.clone();
        self.normal.remove(&code);
        self.refresh();
        Some(KeyChange::Released(before))
    }

    fn press_system(&mut self, key: u16) -> Option<KeyChange> {
        if !self.system.insert(key) {
            return None;
        }
        self.refresh();
        Some(KeyChange::Pressed(self.active.clone()))
    }

    fn release_system(&mut self, key: u16) -> Option<KeyChange> {
        if !self.system.contains(&key) {
            return None;
        }
        let before = self.active.clone();
        self.system.remove(&key);
        self.refresh();
        Some(KeyChange::Released(before))
    }

    fn refresh(&mut self) {
        self.active = ComboId::from_codes(
            self.normal
                .iter()
                .map(|&c| u32::from(c))
                .chain(self.system.iter().map(|&k| SYSTEM_KEY_OFFSET + u32::from(k))),
        );
    }
}
