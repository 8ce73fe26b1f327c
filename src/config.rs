//! Process configuration
//!
//! The binary parses flags and environment variables with clap and hands the
//! result to [`ServerConfig`]. Everything here is plain data plus the parsing
//! helpers that turn raw strings into typed settings.

use crate::api::ApiServerConfig;
use crate::ingester::IngesterConfig;
use crate::{Error, Result};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::info;

/// How the sink learns that it should reopen its file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RotationMode {
    /// Never reopen.
    None,
    /// Reopen on `SIGUSR1` or an explicit request through a reopen handle.
    #[default]
    Signal,
    /// Reopen when the marker file's modification time advances.
    MarkerFile(PathBuf),
}

impl RotationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationMode::None => "none",
            RotationMode::Signal => "signal",
            RotationMode::MarkerFile(_) => "marker",
        }
    }

    /// Combine the `--rotation` setting with an optional marker path.
    ///
    /// A marker path on its own selects marker mode; `marker` without a path
    /// is rejected, as is a path alongside another mode.
    pub fn resolve(mode: Option<&str>, marker: Option<PathBuf>) -> Result<Self> {
        let mode = mode.map(|m| m.trim().to_ascii_lowercase());
        match (mode.as_deref(), marker) {
            (None, Some(path)) | (Some("marker" | "marker_file" | "file"), Some(path)) => {
                Ok(Self::MarkerFile(path))
            }
            (Some("marker" | "marker_file" | "file"), None) => Err(Error::Config(
                "rotation mode 'marker' requires a reopen trigger path".to_string(),
            )),
            (None | Some("signal" | "sigusr1"), None) => Ok(Self::Signal),
            (Some("none" | "off"), None) => Ok(Self::None),
            (Some(other @ ("signal" | "sigusr1" | "none" | "off")), Some(path)) => {
                Err(Error::Config(format!(
                    "reopen trigger '{}' conflicts with rotation mode '{}'",
                    path.display(),
                    other
                )))
            }
            (Some(other), _) => Err(Error::Config(format!(
                "unknown rotation mode '{}'; expected one of signal, marker, none",
                other
            ))),
        }
    }
}

/// Full configuration of one receiver process.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub ingester: IngesterConfig,
    pub api: ApiServerConfig,
    /// Write the process id here at startup
    pub pid_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ingester.output.as_os_str().is_empty() {
            return Err(Error::Config("output path is required".to_string()));
        }
        if let RotationMode::MarkerFile(path) = &self.ingester.rotation {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(
                    "reopen trigger path cannot be empty".to_string(),
                ));
            }
            if path == &self.ingester.output {
                return Err(Error::Config(
                    "reopen trigger path must differ from the output path".to_string(),
                ));
            }
        }
        if self.api.max_body_size == 0 {
            return Err(Error::Config(
                "max body size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a listen address. A bare `:port` binds every interface.
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();
    if let Some(port) = raw.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("invalid listen port '{}': {}", port, e)))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    raw.parse::<SocketAddr>()
        .map_err(|e| Error::Config(format!("invalid listen address '{}': {}", raw, e)))
}

/// Write the current process id, in decimal, to `path`.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())?;
    info!(path = %path.display(), pid, "Wrote pid file");
    Ok(())
}
