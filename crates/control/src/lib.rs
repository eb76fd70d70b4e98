//! Remote command execution over a multiplexed OpenSSH control connection.
//!
//! One authenticated SSH master is established per target and shared by
//! every subsequent remote command through a Unix-domain control socket,
//! eliminating per-command handshake cost. No custom daemon runs on the
//! remote; everything is composed from shell one-liners.

mod channel;
mod target;

pub use channel::{ControlChannel, ControlOptions};
pub use target::TargetSpec;

/// Default `ControlPersist` lifetime for the SSH master, in seconds.
pub const CONTROL_PERSIST_SECS: u64 = 600;

/// Errors produced by the control channel.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("invalid target {0:?} (expected user@host:port)")]
    InvalidTarget(String),

    #[error("SSH control master unavailable: {0}")]
    Unavailable(String),

    #[error("remote command failed (exit {exit_code}): {cmd}")]
    CommandFailed {
        cmd: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
