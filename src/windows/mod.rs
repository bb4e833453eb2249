//! Window module for focus resolution
//!
//! Keeps a periodically refreshed pid → window map so the dispatcher can
//! focus a specific window without enumerating on the input path.

mod cache;
#[cfg(target_os = "macos")]
mod macos;

use std::sync::Arc;

pub use cache::{
    FocusableWindow, HandleDiscovery, MemoizedDiscovery, NoDiscovery, NullWindowSource,
    ProcessDescriptor, WindowCache, WindowError, WindowFocusResolver, WindowHandle,
    WindowSnapshot, WindowSource,
};
#[cfg(target_os = "macos")]
pub use macos::{MacWindowSource, RemoteTokenDiscovery};

/// The window source for the host platform
pub fn platform_source() -> Arc<dyn WindowSource> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(MacWindowSource::default())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(NullWindowSource)
    }
}
