use crate::CHUNK_SIZE;

/// Chunk layout of an archive: how many fixed-size chunks cover
/// `total_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_bytes: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

impl ChunkPlan {
    /// Plans `total_bytes` with the standard [`CHUNK_SIZE`].
    pub fn new(total_bytes: u64) -> Self {
        Self::with_chunk_size(total_bytes, CHUNK_SIZE)
    }

    /// Plans `total_bytes` with an explicit chunk size.
    ///
    /// An exact multiple of the chunk size yields exactly
    /// `total_bytes / chunk_size` chunks; there is never a trailing empty
    /// chunk.
    pub fn with_chunk_size(total_bytes: u64, chunk_size: u64) -> Self {
        Self {
            total_bytes,
            chunk_size,
            total_chunks: total_bytes.div_ceil(chunk_size),
        }
    }
}

/// Outcome of probing an existing staging file before a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeCheck {
    /// The partial is chunk-aligned and no larger than the archive; the
    /// transfer continues at `start_chunk` with `resumed_bytes` already
    /// in place.
    Admissible { start_chunk: u64, resumed_bytes: u64 },
    /// The partial is misaligned or larger than the archive. Nothing can
    /// be trusted; the caller decides whether to abort or start over.
    Corrupt,
}

/// Checks whether an existing staging file of `existing_bytes` admits a
/// resume against `plan`.
///
/// A resume is admissible iff the size is a whole number of chunks and does
/// not exceed the archive. A missing file (size 0) resumes from chunk 0.
pub fn evaluate_resume(existing_bytes: u64, plan: &ChunkPlan) -> ResumeCheck {
    if existing_bytes > plan.total_bytes || existing_bytes % plan.chunk_size != 0 {
        return ResumeCheck::Corrupt;
    }
    ResumeCheck::Admissible {
        start_chunk: existing_bytes / plan.chunk_size,
        resumed_bytes: existing_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_counts_partial_tail() {
        let plan = ChunkPlan::with_chunk_size(10, 4);
        assert_eq!(plan.total_chunks, 3);
    }

    #[test]
    fn plan_exact_multiple_no_empty_tail() {
        let plan = ChunkPlan::with_chunk_size(12, 4);
        assert_eq!(plan.total_chunks, 3);
    }

    #[test]
    fn plan_single_short_chunk() {
        let plan = ChunkPlan::with_chunk_size(1, 4);
        assert_eq!(plan.total_chunks, 1);
    }

    #[test]
    fn plan_empty_archive() {
        let plan = ChunkPlan::with_chunk_size(0, 4);
        assert_eq!(plan.total_chunks, 0);
    }

    #[test]
    fn plan_default_chunk_size() {
        let plan = ChunkPlan::new(10 * 1024 * 1024);
        assert_eq!(plan.chunk_size, CHUNK_SIZE);
        assert_eq!(plan.total_chunks, 3); // 2 full chunks + tail
    }

    #[test]
    fn resume_from_scratch() {
        let plan = ChunkPlan::with_chunk_size(10, 4);
        assert_eq!(
            evaluate_resume(0, &plan),
            ResumeCheck::Admissible {
                start_chunk: 0,
                resumed_bytes: 0
            }
        );
    }

    #[test]
    fn resume_aligned_prefix() {
        let plan = ChunkPlan::with_chunk_size(10, 4);
        assert_eq!(
            evaluate_resume(8, &plan),
            ResumeCheck::Admissible {
                start_chunk: 2,
                resumed_bytes: 8
            }
        );
    }

    #[test]
    fn resume_misaligned_is_corrupt() {
        let plan = ChunkPlan::with_chunk_size(10, 4);
        assert_eq!(evaluate_resume(5, &plan), ResumeCheck::Corrupt);
    }

    #[test]
    fn resume_larger_than_archive_is_corrupt() {
        let plan = ChunkPlan::with_chunk_size(10, 4);
        assert_eq!(evaluate_resume(12, &plan), ResumeCheck::Corrupt);
    }

    #[test]
    fn resume_one_byte_past_alignment_is_corrupt() {
        // 8 MiB + 1 byte partial against a 10 MiB archive.
        let plan = ChunkPlan::new(10 * 1024 * 1024);
        assert_eq!(
            evaluate_resume(8 * 1024 * 1024 + 1, &plan),
            ResumeCheck::Corrupt
        );
    }

    #[test]
    fn resume_complete_partial() {
        let plan = ChunkPlan::with_chunk_size(12, 4);
        assert_eq!(
            evaluate_resume(12, &plan),
            ResumeCheck::Admissible {
                start_chunk: 3,
                resumed_bytes: 12
            }
        );
    }
}
