//! Local archive creation, validation and extraction via the system `tar`
//! binary, plus the staging-file naming shared with the remote side.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::EngineError;

/// Push staging file name under the remote destination directory.
pub const REMOTE_PARTIAL: &str = ".sshx_partial.tar.gz";

/// Remote pull source archive name under the remote source directory.
pub const REMOTE_PULL_TMP: &str = ".sshx_remote_tmp.tar.gz";

/// Local pull staging file name under the OS temp directory.
pub const LOCAL_PULL_PARTIAL: &str = ".sshx_partial_pull.tar.gz";

/// A local staging tarball that is deleted when dropped, on every exit path.
///
/// Only the push-side source archive uses this: it is rebuilt from the
/// source directory on each run, so keeping it buys nothing. Receiving-side
/// staging files are never guarded this way; they must survive failures to
/// enable resume.
pub struct LocalArchive {
    pub path: PathBuf,
    pub total_bytes: u64,
}

impl Drop for LocalArchive {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), %err, "staging tarball not removed");
        }
    }
}

/// Archives `src_dir` into `$TMPDIR/.sshx_<basename>.tar.gz` and returns a
/// guard that removes the tarball on drop.
pub async fn create_local_archive(
    src_dir: &Path,
    cancel: &CancellationToken,
) -> Result<LocalArchive, EngineError> {
    if !src_dir.is_dir() {
        return Err(EngineError::SourceMissing(src_dir.to_path_buf()));
    }
    let src_dir = std::fs::canonicalize(src_dir)?;
    let base = src_dir
        .file_name()
        .ok_or_else(|| EngineError::SourceMissing(src_dir.clone()))?
        .to_string_lossy()
        .into_owned();
    let parent = src_dir.parent().unwrap_or(Path::new("/")).to_path_buf();

    let mut archive = LocalArchive {
        path: std::env::temp_dir().join(format!(".sshx_{base}.tar.gz")),
        total_bytes: 0,
    };

    let tar_path = archive.path.to_string_lossy().into_owned();
    let parent = parent.to_string_lossy().into_owned();
    let ok = run_tar(&["-czf", &tar_path, "-C", &parent, &base], cancel).await?;
    if !ok {
        return Err(EngineError::TarFailed);
    }

    archive.total_bytes = tokio::fs::metadata(&archive.path).await?.len();
    Ok(archive)
}

/// Validates a local gzipped tarball (`tar -tzf`).
pub async fn validate_local(tar_path: &Path, cancel: &CancellationToken) -> Result<(), EngineError> {
    let tar_path = tar_path.to_string_lossy().into_owned();
    let ok = run_tar(&["-tzf", &tar_path], cancel).await?;
    if !ok {
        return Err(EngineError::ArchiveCorrupted);
    }
    Ok(())
}

/// Extracts a local gzipped tarball into `dest_dir` (`tar -xzf`).
pub async fn extract_local(
    tar_path: &Path,
    dest_dir: &Path,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let tar_path = tar_path.to_string_lossy().into_owned();
    let dest_dir = dest_dir.to_string_lossy().into_owned();
    let ok = run_tar(&["-xzf", &tar_path, "-C", &dest_dir], cancel).await?;
    if !ok {
        return Err(EngineError::ExtractionFailed);
    }
    Ok(())
}

/// Runs the local `tar` binary, bound to the cancellation token. Returns
/// whether it exited successfully.
async fn run_tar(args: &[&str], cancel: &CancellationToken) -> Result<bool, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    debug!(?args, "local tar");
    let mut child = Command::new("tar")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let status = tokio::select! {
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        status = child.wait() => status?,
    };
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn archive_validate_extract_roundtrip() {
        // The staging tarball name is derived from the source basename, so
        // each test uses a distinct one to stay parallel-safe.
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("payload_roundtrip");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.txt"), b"hello\n").unwrap();
        std::fs::write(src.join("sub/b.bin"), vec![0u8; 1024]).unwrap();

        let archive = create_local_archive(&src, &token()).await.unwrap();
        assert!(archive.total_bytes > 0);
        assert!(archive.path.exists());

        validate_local(&archive.path, &token()).await.unwrap();

        let dest = tmp.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        extract_local(&archive.path, &dest, &token()).await.unwrap();

        assert_eq!(
            std::fs::read(dest.join("payload_roundtrip/a.txt")).unwrap(),
            b"hello\n"
        );
        assert_eq!(
            std::fs::read(dest.join("payload_roundtrip/sub/b.bin")).unwrap(),
            vec![0u8; 1024]
        );
    }

    #[tokio::test]
    async fn archive_guard_removes_tarball_on_drop() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("payload_guard");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"x").unwrap();

        let archive = create_local_archive(&src, &token()).await.unwrap();
        let path = archive.path.clone();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_source_dir_fails_before_tar() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let result = create_local_archive(&missing, &token()).await;
        assert!(matches!(result, Err(EngineError::SourceMissing(_))));
    }

    #[tokio::test]
    async fn garbage_file_fails_validation() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("bogus.tar.gz");
        std::fs::write(&bogus, b"this is not a tarball").unwrap();
        let result = validate_local(&bogus, &token()).await;
        assert!(matches!(result, Err(EngineError::ArchiveCorrupted)));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("payload_cancel");
        std::fs::create_dir_all(&src).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = create_local_archive(&src, &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
