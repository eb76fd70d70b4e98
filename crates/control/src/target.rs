use std::path::PathBuf;

use crate::ControlError;

/// A parsed `user@host:port` connection descriptor.
///
/// The control-socket path is derived deterministically from the triple so
/// that repeated invocations against the same target reuse a warm master if
/// one survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub socket_path: PathBuf,
}

impl TargetSpec {
    /// Parses `user@host:port`. Both separators are required; anything else
    /// fails before any network activity. IPv6 literals are not supported.
    pub fn parse(target: &str) -> Result<Self, ControlError> {
        let invalid = || ControlError::InvalidTarget(target.to_string());

        let (user, rest) = target.split_once('@').ok_or_else(invalid)?;
        let (host, port_str) = rest.split_once(':').ok_or_else(invalid)?;

        if user.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        let port: u16 = port_str.parse().map_err(|_| invalid())?;

        let socket_path = PathBuf::from(format!("/tmp/sshx_mux_{user}_{host}_{port}"));
        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
            socket_path,
        })
    }

    /// The `user@host` destination argument handed to ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}
