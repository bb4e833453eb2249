//! State module for trigger resolution
//!
//! - `scheduler`: cancellable deadlines
//! - `machine`: per-combo press/double/triple/hold disambiguation
//! - `engine`: the serialized loop that owns all hotkey state

mod engine;
mod machine;
mod scheduler;

pub use engine::{EngineInput, EngineStatus, HotkeyEngine, DEFAULT_REBUILD_DEBOUNCE};
pub use machine::{Activation, Timing, TriggerDisambiguator, DEFAULT_TRIGGER_WINDOW};
pub use scheduler::{DueTask, Scheduler, TaskId};
