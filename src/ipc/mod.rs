//! IPC module for daemon-collaborator communication

mod protocol;
mod server;

pub use protocol::{
    encode_frame, read_frame, write_frame, DaemonStatus, Notification, Request, Response,
    MAX_MESSAGE_LEN,
};
pub use server::Server;
