//! Bindings module: data model, combo registry and conflict detection

mod conflict;
mod model;
mod registry;

pub use conflict::{Conflict, ConflictDetector, ConflictReport};
pub use model::{
    AppBehavior, AppTarget, Binding, ComboId, MacroStep, ScriptSource, ShortcutKey,
    SystemAction, Target, TargetKind, TriggerType, SYSTEM_KEY_OFFSET,
};
pub use registry::{BuiltinShortcuts, ComboRegistry};
