//! The transfer engine: archives a directory, moves it chunk by chunk over
//! the SSH control channel with per-chunk SHA-256 round-trip verification,
//! and extracts it on the receiving side. Progress is crash-resumable at
//! chunk granularity.

pub mod archive;
pub mod progress;
pub mod pull;
pub mod push;
pub mod transport;

use sshx_control::ControlError;
use sshx_transfer::{TransferError, MAX_RETRY, WORKERS};

pub use pull::pull;
pub use push::push;

/// Tunables for a transfer job.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Worker count; also the bounded queue capacity.
    pub workers: usize,
    /// Attempts per chunk before the whole job aborts.
    pub max_retry: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: WORKERS,
            max_retry: MAX_RETRY,
        }
    }
}

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source directory not found: {}", .0.display())]
    SourceMissing(std::path::PathBuf),

    #[error("archive creation failed")]
    TarFailed,

    #[error("staging file is misaligned or larger than the archive (corrupt resume)")]
    CorruptResume,

    #[error("chunk {0} failed verification")]
    ChunkFailed(u64),

    #[error("remote hash count mismatch (expected {expected}, got {actual})")]
    RemoteHashCountMismatch { expected: usize, actual: usize },

    #[error("assembled archive is corrupted")]
    ArchiveCorrupted,

    #[error("extraction failed")]
    ExtractionFailed,

    #[error("transfer cancelled")]
    Cancelled,

    #[error(transparent)]
    Control(ControlError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ControlError> for EngineError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Cancelled => EngineError::Cancelled,
            other => EngineError::Control(other),
        }
    }
}

impl EngineError {
    /// `true` for the cooperative-shutdown error, as opposed to a real
    /// failure. Used when aggregating worker results: a genuine error from
    /// one worker outranks the `Cancelled` the others report after the job
    /// token fires.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}
