//! Tool configuration, stored as TOML at `~/.config/sshx/stream.toml`.
//!
//! Only transfer tunables live here. The chunk size is a compile-time
//! constant: it defines the staging-file layout, and changing it would
//! invalidate every existing partial.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sshx_control::CONTROL_PERSIST_SECS;
use sshx_transfer::{MAX_RETRY, WORKERS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transfer worker count (also the queue depth).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per chunk before the transfer aborts.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// SSH `ControlPersist` idle lifetime in seconds.
    #[serde(default = "default_control_persist_secs")]
    pub control_persist_secs: u64,

    /// OpenSSH client binary to invoke.
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
}

fn default_workers() -> usize {
    WORKERS
}

fn default_max_retry() -> u32 {
    MAX_RETRY
}

fn default_control_persist_secs() -> u64 {
    CONTROL_PERSIST_SECS
}

fn default_ssh_binary() -> String {
    "ssh".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retry: default_max_retry(),
            control_persist_secs: default_control_persist_secs(),
            ssh_binary: default_ssh_binary(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default file if none
    /// exists yet.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("sshx")
        .join("stream.toml")
}
