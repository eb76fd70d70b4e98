//! The chunk I/O seam between the worker pool and the remote shell.
//!
//! `ChunkTransport` abstracts the three per-chunk remote operations so the
//! pool's retry and verification logic is testable against a mock; the real
//! implementation composes `dd`/`sha256sum` one-liners over the control
//! channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sshx_control::ControlChannel;

use crate::EngineError;

/// Per-chunk remote I/O.
pub trait ChunkTransport: Send + Sync {
    /// Writes `data` at chunk `index` of the remote staging file.
    fn write_chunk<'a>(
        &'a self,
        index: u64,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

    /// Re-reads chunk `index` on the remote and returns its SHA-256 hex
    /// digest.
    fn read_back_hash(
        &self,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send + '_>>;

    /// Fetches the bytes of chunk `index` from the remote source file.
    fn fetch_chunk(
        &self,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, EngineError>> + Send + '_>>;
}

/// `dd`-based chunk I/O against one remote file over the control channel.
pub struct SshChunkTransport {
    channel: Arc<ControlChannel>,
    remote_file: String,
    chunk_size: u64,
}

impl SshChunkTransport {
    pub fn new(channel: Arc<ControlChannel>, remote_file: String, chunk_size: u64) -> Self {
        Self {
            channel,
            remote_file,
            chunk_size,
        }
    }
}

impl ChunkTransport for SshChunkTransport {
    fn write_chunk<'a>(
        &'a self,
        index: u64,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let cmd = write_chunk_cmd(&self.remote_file, self.chunk_size, index);
            self.channel.pipe_in(&cmd, data).await?;
            Ok(())
        })
    }

    fn read_back_hash(
        &self,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send + '_>> {
        Box::pin(async move {
            let cmd = read_back_hash_cmd(&self.remote_file, self.chunk_size, index);
            Ok(self.channel.run(&cmd).await?)
        })
    }

    fn fetch_chunk(
        &self,
        index: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, EngineError>> + Send + '_>> {
        Box::pin(async move {
            let cmd = fetch_chunk_cmd(&self.remote_file, self.chunk_size, index);
            Ok(self.channel.output(&cmd).await?)
        })
    }
}

/// `dd` write at a chunk-aligned seek, without truncating the staging file.
pub fn write_chunk_cmd(remote_file: &str, chunk_size: u64, index: u64) -> String {
    format!("dd of=\"{remote_file}\" bs={chunk_size} seek={index} conv=notrunc")
}

/// Read one chunk back and hash it remotely.
pub fn read_back_hash_cmd(remote_file: &str, chunk_size: u64, index: u64) -> String {
    format!(
        "dd if=\"{remote_file}\" bs={chunk_size} skip={index} count=1 2>/dev/null | sha256sum | awk '{{print $1}}'"
    )
}

/// Read one chunk's raw bytes.
pub fn fetch_chunk_cmd(remote_file: &str, chunk_size: u64, index: u64) -> String {
    format!("dd if=\"{remote_file}\" bs={chunk_size} skip={index} count=1 2>/dev/null")
}

/// Hash chunks `[start_chunk, total_chunks)` of `remote_file` in a single
/// round trip, one hex digest per line.
pub fn hash_prefetch_cmd(
    remote_file: &str,
    chunk_size: u64,
    start_chunk: u64,
    total_chunks: u64,
) -> String {
    format!(
        "\ni={start_chunk}\nwhile [ $i -lt {total_chunks} ]; do\n\tdd if=\"{remote_file}\" bs={chunk_size} skip=$i count=1 2>/dev/null | sha256sum | awk '{{print $1}}'\n\ti=$((i+1))\ndone\n"
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_cmd_matches_remote_contract() {
        assert_eq!(
            write_chunk_cmd("/srv/app/.sshx_partial.tar.gz", 4194304, 2),
            "dd of=\"/srv/app/.sshx_partial.tar.gz\" bs=4194304 seek=2 conv=notrunc"
        );
    }

    #[test]
    fn read_back_cmd_pipes_into_sha256sum() {
        assert_eq!(
            read_back_hash_cmd("/srv/app/.sshx_partial.tar.gz", 4194304, 0),
            "dd if=\"/srv/app/.sshx_partial.tar.gz\" bs=4194304 skip=0 count=1 2>/dev/null | sha256sum | awk '{print $1}'"
        );
    }

    #[test]
    fn fetch_cmd_silences_dd_noise() {
        assert_eq!(
            fetch_chunk_cmd("/srv/app/.sshx_remote_tmp.tar.gz", 4194304, 7),
            "dd if=\"/srv/app/.sshx_remote_tmp.tar.gz\" bs=4194304 skip=7 count=1 2>/dev/null"
        );
    }

    #[test]
    fn prefetch_cmd_iterates_requested_range() {
        let cmd = hash_prefetch_cmd("/srv/x.tar.gz", 4194304, 2, 5);
        assert!(cmd.contains("i=2"));
        assert!(cmd.contains("while [ $i -lt 5 ]"));
        assert!(cmd.contains("sha256sum"));
        assert!(cmd.contains("i=$((i+1))"));
    }
}
