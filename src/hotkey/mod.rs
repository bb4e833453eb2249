//! Hotkey module for global keyboard event listening
//!
//! Uses a macOS CGEventTap to observe key down/up, modifier flag changes and
//! media keys, and normalizes them into an authoritative pressed-key set.

pub mod keys;
mod listener;
#[cfg(target_os = "macos")]
mod tap;
mod tracker;

pub use keys::{KeyTransition, SystemKeyEvent, TransitionKind};
pub use listener::{has_accessibility_permission, HotkeyError, HotkeyListener};
pub use tracker::{KeyChange, KeyStateTracker};
