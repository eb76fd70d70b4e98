//! Chunked transfer primitives: fixed-size chunk reading with SHA-256
//! checksums, resume planning, and shared transfer accounting.

mod chunk;
mod plan;
mod stats;

pub use chunk::{checksum_bytes, Chunk, ChunkReader};
pub use plan::{evaluate_resume, ChunkPlan, ResumeCheck};
pub use stats::TransferStats;

/// Chunk size: 4 MiB.
///
/// This constant defines the on-disk layout of staging files: chunk `i`
/// occupies byte range `[i * CHUNK_SIZE, i * CHUNK_SIZE + len)`. Changing it
/// invalidates any existing partial, so it is deliberately not configurable.
pub const CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of transfer attempts per chunk before the job aborts.
pub const MAX_RETRY: u32 = 3;

/// Default worker count (and bounded queue capacity).
pub const WORKERS: usize = 3;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
