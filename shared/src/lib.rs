pub mod ipc;
pub mod mode;

pub use ipc::{Command, IpcError, Response, StatusInfo};
pub use mode::ListeningMode;
