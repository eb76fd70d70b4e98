use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ControlError, TargetSpec};

/// Options for the SSH client invocation.
#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// Path or name of the OpenSSH client binary.
    pub ssh_binary: String,
    /// `ControlPersist` idle lifetime of the master, in seconds.
    pub control_persist_secs: u64,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".into(),
            control_persist_secs: crate::CONTROL_PERSIST_SECS,
        }
    }
}

/// A multiplexed SSH control connection to one remote target.
///
/// [`establish`](Self::establish) starts a background master process; every
/// later command is a short-lived `ssh -S <socket>` client that rides the
/// shared connection. In-flight children are bound to the cancellation
/// token: cancelling the token kills them rather than merely setting a flag.
pub struct ControlChannel {
    target: TargetSpec,
    opts: ControlOptions,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl ControlChannel {
    pub fn new(target: TargetSpec, opts: ControlOptions, cancel: CancellationToken) -> Self {
        Self {
            target,
            opts,
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    /// Starts the background control master (`-fN`, no remote command).
    ///
    /// Stdio is inherited so interactive authentication still works.
    pub async fn establish(&self) -> Result<(), ControlError> {
        if self.cancel.is_cancelled() {
            return Err(ControlError::Cancelled);
        }
        let args = master_args(&self.target, self.opts.control_persist_secs);
        debug!(socket = %self.target.socket_path.display(), "establishing control master");

        let mut child = Command::new(&self.opts.ssh_binary)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControlError::Unavailable(e.to_string()))?;

        let status = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ControlError::Cancelled),
            status = child.wait() => status?,
        };
        if !status.success() {
            return Err(ControlError::Unavailable(format!(
                "ssh exited with {status}"
            )));
        }
        Ok(())
    }

    /// Runs `cmd` on the remote and returns stdout with trailing whitespace
    /// stripped. Non-zero exit is an error.
    pub async fn run(&self, cmd: &str) -> Result<String, ControlError> {
        let output = self.exec_capture(cmd).await?;
        Ok(String::from_utf8_lossy(&output).trim_end().to_string())
    }

    /// Runs `cmd` on the remote and returns raw stdout bytes. Non-zero exit
    /// is an error.
    pub async fn output(&self, cmd: &str) -> Result<Vec<u8>, ControlError> {
        self.exec_capture(cmd).await
    }

    /// Runs `cmd` on the remote while streaming `data` into its stdin.
    pub async fn pipe_in(&self, cmd: &str, data: &[u8]) -> Result<(), ControlError> {
        if self.cancel.is_cancelled() {
            return Err(ControlError::Cancelled);
        }
        debug!(%cmd, bytes = data.len(), "remote command (stdin pipe)");
        let mut child = Command::new(&self.opts.ssh_binary)
            .args(exec_args(&self.target))
            .arg(cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ControlError::Io(std::io::Error::other("child stdin unavailable")))?;

        let wait = async move {
            stdin.write_all(data).await?;
            stdin.shutdown().await?;
            // Stdin must be closed before waiting, or the remote command
            // blocks on EOF forever.
            drop(stdin);
            child.wait().await
        };

        let status = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ControlError::Cancelled),
            status = wait => status?,
        };
        if !status.success() {
            return Err(ControlError::CommandFailed {
                cmd: cmd.to_string(),
                exit_code: status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    /// Gracefully stops the control master (`-O exit`). Idempotent; failure
    /// to close is logged and swallowed. Never raced against cancellation so
    /// it also runs on signal exits.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = Command::new(&self.opts.ssh_binary)
            .args(close_args(&self.target))
            .stdin(Stdio::null())
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => {
                debug!("control master closed");
            }
            Ok(out) => {
                debug!(status = %out.status, "control master close returned non-zero");
            }
            Err(err) => {
                warn!(%err, "failed to run ssh -O exit");
            }
        }
    }

    async fn exec_capture(&self, cmd: &str) -> Result<Vec<u8>, ControlError> {
        if self.cancel.is_cancelled() {
            return Err(ControlError::Cancelled);
        }
        debug!(%cmd, "remote command");
        let child = Command::new(&self.opts.ssh_binary)
            .args(exec_args(&self.target))
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ControlError::Cancelled),
            output = child.wait_with_output() => output?,
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            debug!(%cmd, status = %output.status, %stderr, "remote command failed");
            return Err(ControlError::CommandFailed {
                cmd: cmd.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(output.stdout)
    }
}

/// Argument list for establishing the background master.
fn master_args(target: &TargetSpec, persist_secs: u64) -> Vec<String> {
    vec![
        "-p".into(),
        target.port.to_string(),
        "-o".into(),
        "ControlMaster=yes".into(),
        "-o".into(),
        format!("ControlPersist={persist_secs}"),
        "-o".into(),
        format!("ControlPath={}", target.socket_path.display()),
        "-fN".into(),
        target.destination(),
    ]
}

/// Argument prefix for one-shot commands riding the master.
fn exec_args(target: &TargetSpec) -> Vec<String> {
    vec![
        "-p".into(),
        target.port.to_string(),
        "-S".into(),
        target.socket_path.display().to_string(),
        target.destination(),
    ]
}

/// Argument list for the graceful master shutdown.
fn close_args(target: &TargetSpec) -> Vec<String> {
    vec![
        "-S".into(),
        target.socket_path.display().to_string(),
        "-O".into(),
        "exit".into(),
        target.destination(),
    ]
}
