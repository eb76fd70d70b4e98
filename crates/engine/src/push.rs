//! Push pipeline: archive a local directory, stream it into the remote
//! staging file chunk by chunk, then validate and extract remotely.

use std::path::Path;
use std::sync::Arc;

use sshx_control::{ControlChannel, ControlError};
use sshx_transfer::{
    evaluate_resume, Chunk, ChunkPlan, ChunkReader, ResumeCheck, TransferStats,
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{self, REMOTE_PARTIAL};
use crate::progress;
use crate::transport::{ChunkTransport, SshChunkTransport};
use crate::{EngineError, EngineOptions};

/// Pushes `local_dir` to `remote_path` on the channel's target.
pub async fn push(
    channel: Arc<ControlChannel>,
    opts: EngineOptions,
    local_dir: &Path,
    remote_path: &str,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    println!("📦 Creating archive...");
    let archive = archive::create_local_archive(local_dir, &cancel).await?;
    let plan = ChunkPlan::new(archive.total_bytes);

    channel.run(&format!("mkdir -p \"{remote_path}\"")).await?;

    let staging = format!("{remote_path}/{REMOTE_PARTIAL}");
    let existing = probe_remote_size(&channel, &staging).await?;
    let (start_chunk, resumed_bytes) = match evaluate_resume(existing, &plan) {
        ResumeCheck::Admissible {
            start_chunk,
            resumed_bytes,
        } => (start_chunk, resumed_bytes),
        ResumeCheck::Corrupt => return Err(EngineError::CorruptResume),
    };
    if start_chunk > 0 {
        info!(start_chunk, resumed_bytes, "resuming push");
    }

    let stats = Arc::new(TransferStats::new(archive.total_bytes, resumed_bytes));
    let transport: Arc<dyn ChunkTransport> = Arc::new(SshChunkTransport::new(
        Arc::clone(&channel),
        staging.clone(),
        plan.chunk_size,
    ));

    run_push_pool(
        &archive.path,
        &plan,
        start_chunk,
        transport,
        Arc::clone(&stats),
        &opts,
        &cancel,
    )
    .await?;

    println!("\n🔍 Validating archive...");
    channel
        .run(&format!("tar -tzf \"{staging}\" > /dev/null"))
        .await
        .map_err(|err| match err {
            ControlError::CommandFailed { .. } => EngineError::ArchiveCorrupted,
            other => other.into(),
        })?;

    println!("📦 Extracting...");
    channel
        .run(&format!(
            "tar -xzf \"{staging}\" -C \"{remote_path}\" && rm -f \"{staging}\""
        ))
        .await
        .map_err(|err| match err {
            ControlError::CommandFailed { .. } => EngineError::ExtractionFailed,
            other => other.into(),
        })?;

    Ok(())
}

/// Reads the size of the remote staging file, 0 when absent. The `|| echo 0`
/// fallback makes the command succeed either way, so a hard failure here is
/// treated as an empty staging file rather than aborting the transfer.
async fn probe_remote_size(
    channel: &ControlChannel,
    staging: &str,
) -> Result<u64, EngineError> {
    let cmd = format!("stat -c%s \"{staging}\" 2>/dev/null || echo 0");
    match channel.run(&cmd).await {
        Ok(out) => Ok(out.trim().parse().unwrap_or(0)),
        Err(ControlError::Cancelled) => Err(EngineError::Cancelled),
        Err(err) => {
            warn!(%err, "staging probe failed, assuming empty");
            Ok(0)
        }
    }
}

/// Producer + bounded worker pool for the chunk range
/// `[start_chunk, total_chunks)`.
async fn run_push_pool(
    archive_path: &Path,
    plan: &ChunkPlan,
    start_chunk: u64,
    transport: Arc<dyn ChunkTransport>,
    stats: Arc<TransferStats>,
    opts: &EngineOptions,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    if start_chunk >= plan.total_chunks {
        return Ok(());
    }

    let (tx, rx) = mpsc::channel::<Chunk>(opts.workers);
    let rx = Arc::new(Mutex::new(rx));

    let printer_stop = cancel.child_token();
    let printer = progress::spawn_printer(Arc::clone(&stats), printer_stop.clone());

    let producer = {
        let cancel = cancel.clone();
        let path = archive_path.to_path_buf();
        let chunk_size = plan.chunk_size;
        tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
            let mut reader = ChunkReader::with_chunk_size(&path, chunk_size)?;
            reader.seek_to_chunk(start_chunk)?;
            while let Some(chunk) = reader.next_chunk()? {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                // Send fails only once every worker is gone, which means
                // the job is already being torn down.
                if tx.blocking_send(chunk).is_err() {
                    return Err(EngineError::Cancelled);
                }
            }
            Ok(())
        })
    };

    let mut workers = Vec::with_capacity(opts.workers);
    for _ in 0..opts.workers {
        let rx = Arc::clone(&rx);
        let transport = Arc::clone(&transport);
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();
        let max_retry = opts.max_retry;
        workers.push(tokio::spawn(async move {
            let result = push_worker(rx, transport, stats, max_retry, cancel.clone()).await;
            if let Err(ref err) = result {
                if !err.is_cancelled() {
                    cancel.cancel();
                }
            }
            result
        }));
    }
    // The pool's own receiver handle must go away, or a producer blocked on
    // a full queue would never observe the workers exiting.
    drop(rx);

    let mut failure: Option<EngineError> = None;
    match producer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => failure = prefer_failure(failure, err),
        Err(join_err) => {
            failure = prefer_failure(failure, EngineError::Io(std::io::Error::other(join_err)))
        }
    }
    for handle in workers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => failure = prefer_failure(failure, err),
            Err(join_err) => {
                failure = prefer_failure(failure, EngineError::Io(std::io::Error::other(join_err)))
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

/// Keeps the most meaningful failure: a real error outranks the `Cancelled`
/// that other tasks report once the job token fires.
pub(crate) fn prefer_failure(
    current: Option<EngineError>,
    new: EngineError,
) -> Option<EngineError> {
    match current {
        None => Some(new),
        Some(cur) if cur.is_cancelled() && !new.is_cancelled() => Some(new),
        Some(cur) => Some(cur),
    }
}

async fn push_worker(
    rx: Arc<Mutex<mpsc::Receiver<Chunk>>>,
    transport: Arc<dyn ChunkTransport>,
    stats: Arc<TransferStats>,
    max_retry: u32,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            chunk = async { rx.lock().await.recv().await } => chunk,
        };
        let Some(chunk) = next else {
            return Ok(());
        };
        transfer_chunk(transport.as_ref(), &chunk, max_retry, &cancel).await?;
        stats.add(chunk.data.len() as u64);
    }
}

/// One chunk's write + remote hash round-trip, retried up to `max_retry`
/// attempts.
async fn transfer_chunk(
    transport: &dyn ChunkTransport,
    chunk: &Chunk,
    max_retry: u32,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    for attempt in 1..=max_retry {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match transport.write_chunk(chunk.index, &chunk.data).await {
            Ok(()) => {}
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                warn!(chunk = chunk.index, attempt, %err, "chunk write failed");
                continue;
            }
        }
        match transport.read_back_hash(chunk.index).await {
            Ok(remote_hash) if remote_hash == chunk.checksum => return Ok(()),
            Ok(remote_hash) => {
                warn!(
                    chunk = chunk.index,
                    attempt, %remote_hash, "remote hash mismatch"
                );
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                warn!(chunk = chunk.index, attempt, %err, "hash read-back failed");
            }
        }
    }
    Err(EngineError::ChunkFailed(chunk.index))
}
