use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{TransferError, CHUNK_SIZE};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// One fixed-offset chunk of an archive.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based chunk index; the chunk occupies
    /// `[index * chunk_size, index * chunk_size + data.len())`.
    pub index: u64,
    /// Raw chunk bytes. All chunks except the last are exactly
    /// `chunk_size` long.
    pub data: Vec<u8>,
    /// SHA-256 hex digest of `data`, computed at read time.
    pub checksum: String,
}

/// Reads a file as a sequence of fixed-size, checksummed chunks.
///
/// Reads are blocking; callers on an async runtime drive the reader from a
/// blocking task.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: u64,
    next_index: u64,
    total_bytes: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading with the standard [`CHUNK_SIZE`].
    pub fn new(path: &Path) -> Result<Self, TransferError> {
        Self::with_chunk_size(path, CHUNK_SIZE)
    }

    /// Opens `path` with an explicit chunk size.
    pub fn with_chunk_size(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let total_bytes = file.metadata()?.len();
        Ok(Self {
            file,
            chunk_size,
            next_index: 0,
            total_bytes,
        })
    }

    /// Positions the reader so that the next chunk returned is `index`
    /// (for resume).
    pub fn seek_to_chunk(&mut self, index: u64) -> Result<(), TransferError> {
        self.file.seek(SeekFrom::Start(index * self.chunk_size))?;
        self.next_index = index;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at end of file; a file whose
    /// length is an exact multiple of the chunk size yields no trailing
    /// empty chunk.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let offset = self.next_index * self.chunk_size;
        if offset >= self.total_bytes {
            return Ok(None);
        }

        let want = (self.total_bytes - offset).min(self.chunk_size) as usize;
        let mut buf = vec![0u8; want];
        // A single read may come back short; fill the buffer until EOF.
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        let checksum = checksum_bytes(&buf);
        let chunk = Chunk {
            index: self.next_index,
            data: buf,
            checksum,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }

    /// Total file size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}
