//! Combo registry
//!
//! Indexes bindings by canonical combo id. The registry is immutable once
//! built; configuration changes produce a fresh registry.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use super::model::{Binding, ComboId, ShortcutKey, SystemAction, TriggerType};

/// Keys for the built-in pseudo-bindings injected at every rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltinShortcuts {
    /// Held to reveal the cheatsheet overlay
    pub cheatsheet: Option<Vec<ShortcutKey>>,
    /// Pressed to quick-assign the frontmost app
    pub quick_assign: Option<Vec<ShortcutKey>>,
}

impl BuiltinShortcuts {
    /// Synthesize the pseudo-bindings for every configured built-in
    pub fn synthesize(&self) -> Vec<Binding> {
        let mut builtins = Vec::new();
        if let Some(keys) = &self.cheatsheet {
            builtins.push(Binding::builtin(
                SystemAction::Cheatsheet,
                keys.clone(),
                TriggerType::Hold,
            ));
        }
        if let Some(keys) = &self.quick_assign {
            builtins.push(Binding::builtin(
                SystemAction::QuickAssign,
                keys.clone(),
                TriggerType::Press,
            ));
        }
        builtins
    }
}

/// Lookup table from combo id to every binding registered on it
#[derive(Debug, Default)]
pub struct ComboRegistry {
    index: HashMap<ComboId, Vec<Binding>>,
    len: usize,
}

impl ComboRegistry {
    /// Build a registry from user bindings plus built-in pseudo-bindings
    pub fn build(bindings: &[Binding], builtins: &BuiltinShortcuts) -> Self {
        let mut index: HashMap<ComboId, Vec<Binding>> = HashMap::new();
        let mut len = 0;

        for binding in bindings.iter().cloned().chain(builtins.synthesize()) {
            let combo = binding.combo_id();
            if combo.is_empty() {
                warn!(binding_id = %binding.id, "skipping binding with no keys");
                continue;
            }
            index.entry(combo).or_default().push(binding);
            len += 1;
        }

        debug!(bindings = len, combos = index.len(), "combo registry built");

        Self { index, len }
    }

    /// All candidates for a combo, in registration order
    pub fn lookup(&self, combo: &ComboId) -> &[Binding] {
        self.index.get(combo).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Candidates for a combo filtered by trigger type
    pub fn bindings_for(&self, combo: &ComboId, trigger: TriggerType) -> Vec<Binding> {
        self.lookup(combo)
            .iter()
            .filter(|b| b.trigger == trigger)
            .cloned()
            .collect()
    }

    /// Distinct trigger types registered on a combo
    pub fn triggers(&self, combo: &ComboId) -> BTreeSet<TriggerType> {
        self.lookup(combo).iter().map(|b| b.trigger).collect()
    }

    pub fn has_trigger(&self, combo: &ComboId, trigger: TriggerType) -> bool {
        self.lookup(combo).iter().any(|b| b.trigger == trigger)
    }

    /// Iterate over every indexed binding
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.index.values().flatten()
    }

    /// Total number of indexed bindings, built-ins included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
