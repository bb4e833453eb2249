//! Daemon lifecycle: shutdown signalling and listener supervision

mod shutdown;
mod supervisor;

pub use shutdown::ShutdownSignal;
pub use supervisor::{Interception, ListenerSupervisor};
