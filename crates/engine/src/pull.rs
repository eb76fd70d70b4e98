//! Pull pipeline: archive the remote directory into a staging tarball,
//! fetch it chunk by chunk against a prefetched hash table, then extract
//! locally.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use sshx_control::ControlChannel;
use sshx_transfer::{
    checksum_bytes, evaluate_resume, ChunkPlan, ResumeCheck, TransferStats,
};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{self, LOCAL_PULL_PARTIAL, REMOTE_PULL_TMP};
use crate::progress;
use crate::transport::{hash_prefetch_cmd, ChunkTransport, SshChunkTransport};
use crate::{EngineError, EngineOptions};

/// Pulls `remote_path` from the channel's target into `local_dir`.
pub async fn pull(
    channel: Arc<ControlChannel>,
    opts: EngineOptions,
    remote_path: &str,
    local_dir: &Path,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(local_dir).await?;

    let remote_tmp = format!("{remote_path}/{REMOTE_PULL_TMP}");
    channel
        .run(&format!(
            "tar -czf \"{remote_tmp}\" -C \"{remote_path}\" ."
        ))
        .await?;

    let size_out = channel.run(&format!("stat -c%s \"{remote_tmp}\"")).await?;
    let total_bytes: u64 = size_out.trim().parse().unwrap_or(0);
    let plan = ChunkPlan::new(total_bytes);

    let staging = std::env::temp_dir().join(LOCAL_PULL_PARTIAL);
    let (start_chunk, resumed_bytes) = resolve_local_resume(&staging, &plan).await?;
    if start_chunk > 0 {
        info!(start_chunk, resumed_bytes, "resuming pull");
    }

    println!("🔍 Fetching remote hashes...");
    let hashes = if start_chunk < plan.total_chunks {
        let raw = channel
            .run(&hash_prefetch_cmd(
                &remote_tmp,
                plan.chunk_size,
                start_chunk,
                plan.total_chunks,
            ))
            .await?;
        parse_hash_lines(&raw, (plan.total_chunks - start_chunk) as usize)?
    } else {
        Vec::new()
    };

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&staging)
        .await?;

    let stats = Arc::new(TransferStats::new(total_bytes, resumed_bytes));
    let transport: Arc<dyn ChunkTransport> = Arc::new(SshChunkTransport::new(
        Arc::clone(&channel),
        remote_tmp.clone(),
        plan.chunk_size,
    ));

    run_pull_pool(
        transport,
        Arc::new(hashes),
        start_chunk,
        &plan,
        Arc::new(Mutex::new(file)),
        Arc::clone(&stats),
        &opts,
        &cancel,
    )
    .await?;

    println!("\n🔍 Validating archive...");
    archive::validate_local(&staging, &cancel).await?;

    println!("📦 Extracting...");
    archive::extract_local(&staging, local_dir, &cancel).await?;
    if let Err(err) = tokio::fs::remove_file(&staging).await {
        warn!(%err, "staging file not removed after extraction");
    }
    if let Err(err) = channel.run(&format!("rm -f \"{remote_tmp}\"")).await {
        warn!(%err, "remote staging archive not removed");
    }

    Ok(())
}

/// Probes the local staging file. A corrupt partial (misaligned or larger
/// than the archive) is deleted and the transfer restarts from chunk 0.
async fn resolve_local_resume(
    staging: &Path,
    plan: &ChunkPlan,
) -> Result<(u64, u64), EngineError> {
    let existing = match tokio::fs::metadata(staging).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    match evaluate_resume(existing, plan) {
        ResumeCheck::Admissible {
            start_chunk,
            resumed_bytes,
        } => Ok((start_chunk, resumed_bytes)),
        ResumeCheck::Corrupt => {
            warn!(path = %staging.display(), existing, "local staging corrupt, restarting");
            tokio::fs::remove_file(staging).await?;
            Ok((0, 0))
        }
    }
}

/// Splits the hash-prefetch output into one digest per chunk and checks the
/// line count against the expected range.
fn parse_hash_lines(raw: &str, expected: usize) -> Result<Vec<String>, EngineError> {
    let hashes: Vec<String> = raw
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    if hashes.len() != expected {
        return Err(EngineError::RemoteHashCountMismatch {
            expected,
            actual: hashes.len(),
        });
    }
    Ok(hashes)
}

#[allow(clippy::too_many_arguments)]
async fn run_pull_pool(
    transport: Arc<dyn ChunkTransport>,
    hashes: Arc<Vec<String>>,
    start_chunk: u64,
    plan: &ChunkPlan,
    file: Arc<Mutex<tokio::fs::File>>,
    stats: Arc<TransferStats>,
    opts: &EngineOptions,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    if start_chunk >= plan.total_chunks {
        return Ok(());
    }

    let (tx, rx) = mpsc::channel::<u64>(opts.workers);
    let rx = Arc::new(Mutex::new(rx));

    let printer_stop = cancel.child_token();
    let printer = progress::spawn_printer(Arc::clone(&stats), printer_stop.clone());

    let producer = {
        let cancel = cancel.clone();
        let total_chunks = plan.total_chunks;
        tokio::spawn(async move {
            for index in start_chunk..total_chunks {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    sent = tx.send(index) => {
                        if sent.is_err() {
                            return Err(EngineError::Cancelled);
                        }
                    }
                }
            }
            Ok(())
        })
    };

    let mut workers = Vec::with_capacity(opts.workers);
    for _ in 0..opts.workers {
        let rx = Arc::clone(&rx);
        let transport = Arc::clone(&transport);
        let hashes = Arc::clone(&hashes);
        let file = Arc::clone(&file);
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();
        let max_retry = opts.max_retry;
        let chunk_size = plan.chunk_size;
        workers.push(tokio::spawn(async move {
            let result = pull_worker(
                rx, transport, hashes, start_chunk, file, chunk_size, stats, max_retry,
                cancel.clone(),
            )
            .await;
            if let Err(ref err) = result {
                if !err.is_cancelled() {
                    cancel.cancel();
                }
            }
            result
        }));
    }
    drop(rx);

    let mut failure: Option<EngineError> = None;
    match producer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => failure = super::push::prefer_failure(failure, err),
        Err(join_err) => {
            failure = super::push::prefer_failure(
                failure,
                EngineError::Io(std::io::Error::other(join_err)),
            )
        }
    }
    for handle in workers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => failure = super::push::prefer_failure(failure, err),
            Err(join_err) => {
                failure = super::push::prefer_failure(
                    failure,
                    EngineError::Io(std::io::Error::other(join_err)),
                )
            }
        }
    }

    printer_stop.cancel();
    let _ = printer.await;

    match failure {
        Some(err) => Err(err),
        None if cancel.is_cancelled() => Err(EngineError::Cancelled),
        None => {
            progress::print_final(&stats);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn pull_worker(
    rx: Arc<Mutex<mpsc::Receiver<u64>>>,
    transport: Arc<dyn ChunkTransport>,
    hashes: Arc<Vec<String>>,
    start_chunk: u64,
    file: Arc<Mutex<tokio::fs::File>>,
    chunk_size: u64,
    stats: Arc<TransferStats>,
    max_retry: u32,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            index = async { rx.lock().await.recv().await } => index,
        };
        let Some(index) = next else {
            return Ok(());
        };
        let expected = &hashes[(index - start_chunk) as usize];
        let data =
            fetch_chunk_verified(transport.as_ref(), index, expected, max_retry, &cancel).await?;

        {
            let mut f = file.lock().await;
            f.seek(SeekFrom::Start(index * chunk_size)).await?;
            f.write_all(&data).await?;
            // Flush inside the lock: a buffered write must not interleave
            // with another worker's seek.
            f.flush().await?;
        }
        stats.add(data.len() as u64);
    }
}

/// Fetches one chunk and verifies it against the prefetched remote hash,
/// retrying up to `max_retry` attempts.
async fn fetch_chunk_verified(
    transport: &dyn ChunkTransport,
    index: u64,
    expected: &str,
    max_retry: u32,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, EngineError> {
    for attempt in 1..=max_retry {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match transport.fetch_chunk(index).await {
            Ok(data) => {
                if checksum_bytes(&data) == expected {
                    return Ok(data);
                }
                warn!(chunk = index, attempt, "fetched chunk hash mismatch");
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                warn!(chunk = index, attempt, %err, "chunk fetch failed");
            }
        }
    }
    Err(EngineError::ChunkFailed(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;
    use tempfile::TempDir;

    const TEST_CHUNK: u64 = 4;

    fn opts() -> EngineOptions {
        EngineOptions {
            workers: 3,
            max_retry: 3,
        }
    }

    fn hash_table(data: &[u8], start_chunk: u64) -> Vec<String> {
        data.chunks(TEST_CHUNK as usize)
            .skip(start_chunk as usize)
            .map(checksum_bytes)
            .collect()
    }

    async fn open_staging(path: &Path) -> tokio::fs::File {
        tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await
            .unwrap()
    }

    async fn run_pool(
        source: &[u8],
        start_chunk: u64,
        staging: &Path,
        transport: Arc<MockTransport>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let plan = ChunkPlan::with_chunk_size(source.len() as u64, TEST_CHUNK);
        let file = open_staging(staging).await;
        let stats = Arc::new(TransferStats::new(
            source.len() as u64,
            start_chunk * TEST_CHUNK,
        ));
        let transport: Arc<dyn ChunkTransport> = transport;
        run_pull_pool(
            transport,
            Arc::new(hash_table(source, start_chunk)),
            start_chunk,
            &plan,
            Arc::new(Mutex::new(file)),
            stats,
            &opts(),
            cancel,
        )
        .await
    }

    #[test]
    fn parse_hash_lines_accepts_exact_count() {
        let raw = "aaa\nbbb\nccc\n";
        let hashes = parse_hash_lines(raw, 3).unwrap();
        assert_eq!(hashes, vec!["aaa", "bbb", "ccc"]);
    }

    #[test]
    fn parse_hash_lines_rejects_short_output() {
        let result = parse_hash_lines("aaa\n", 3);
        assert!(matches!(
            result,
            Err(EngineError::RemoteHashCountMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn parse_hash_lines_empty_output_for_empty_range() {
        assert!(parse_hash_lines("", 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn assembles_file_from_chunks() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("partial.tar.gz");
        let source = b"0123456789".to_vec();

        let transport = Arc::new(MockTransport::with_remote(TEST_CHUNK, source.clone()));
        run_pool(&source, 0, &staging, transport, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&staging).unwrap(), source);
    }

    #[tokio::test]
    async fn resume_preserves_existing_prefix() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("partial.tar.gz");
        let source = b"0123456789".to_vec();
        std::fs::write(&staging, &source[..8]).unwrap();

        let transport = Arc::new(MockTransport::with_remote(TEST_CHUNK, source.clone()));
        run_pool(&source, 2, &staging, transport, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&staging).unwrap(), source);
    }

    #[tokio::test]
    async fn transient_fetch_failure_is_retried() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("partial.tar.gz");
        let source = b"0123456789".to_vec();

        let transport = Arc::new(MockTransport::with_remote(TEST_CHUNK, source.clone()));
        transport.fail_next(1, 1);
        run_pool(&source, 0, &staging, transport, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&staging).unwrap(), source);
    }

    #[tokio::test]
    async fn exhausted_fetch_retries_abort() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("partial.tar.gz");
        let source = b"0123456789".to_vec();

        let transport = Arc::new(MockTransport::with_remote(TEST_CHUNK, source.clone()));
        transport.fail_next(1, 3);
        let result = run_pool(&source, 0, &staging, transport, &CancellationToken::new()).await;

        assert!(matches!(result, Err(EngineError::ChunkFailed(1))));
        // Staging survives for a later resume.
        assert!(staging.exists());
    }

    #[tokio::test]
    async fn corrupt_local_staging_is_deleted_and_restarted() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("partial.tar.gz");
        std::fs::write(&staging, vec![0u8; 5]).unwrap(); // misaligned

        let plan = ChunkPlan::with_chunk_size(12, TEST_CHUNK);
        let (start, resumed) = resolve_local_resume(&staging, &plan).await.unwrap();
        assert_eq!((start, resumed), (0, 0));
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn aligned_local_staging_resumes() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("partial.tar.gz");
        std::fs::write(&staging, vec![0u8; 8]).unwrap();

        let plan = ChunkPlan::with_chunk_size(12, TEST_CHUNK);
        let (start, resumed) = resolve_local_resume(&staging, &plan).await.unwrap();
        assert_eq!((start, resumed), (2, 8));
        assert!(staging.exists());
    }
}
