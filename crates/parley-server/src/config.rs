//! Server configuration: TOML file + CLI overrides.

use parley_core::{RelayError, RelayResult, DEFAULT_MAX_FRAME_LEN};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_queue_depth")]
    pub inbound_queue: usize,
    #[serde(default = "default_queue_depth")]
    pub outbound_queue: usize,
    #[serde(default = "default_queue_depth")]
    pub connection_queue: usize,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            inbound_queue: default_queue_depth(),
            outbound_queue: default_queue_depth(),
            connection_queue: default_queue_depth(),
            max_frame_len: default_max_frame_len(),
            write_timeout: default_write_timeout(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
/// Depth of every bounded queue. A full queue blocks the submitter; nothing
/// is dropped.
fn default_queue_depth() -> usize {
    64
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_write_timeout() -> u64 {
    10
}

/// Resolved server configuration (CLI overrides applied, validated).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub inbound_queue: usize,
    pub outbound_queue: usize,
    pub connection_queue: usize,
    pub max_frame_len: usize,
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_section(ServerSection::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_bind: Option<&str>,
        cli_port: Option<u16>,
    ) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let mut config = Self::from_section(file_config.server);
        if let Some(bind) = cli_bind {
            config.bind = bind.to_string();
        }
        if let Some(port) = cli_port {
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> RelayResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    fn from_section(server: ServerSection) -> Self {
        Self {
            bind: server.bind,
            port: server.port,
            inbound_queue: server.inbound_queue,
            outbound_queue: server.outbound_queue,
            connection_queue: server.connection_queue,
            max_frame_len: server.max_frame_len,
            write_timeout: Duration::from_secs(server.write_timeout),
        }
    }

    /// Reject values the channels and codec cannot work with.
    pub fn validate(&self) -> RelayResult<()> {
        for (name, depth) in [
            ("inbound_queue", self.inbound_queue),
            ("outbound_queue", self.outbound_queue),
            ("connection_queue", self.connection_queue),
        ] {
            if depth == 0 {
                return Err(RelayError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.max_frame_len == 0 {
            return Err(RelayError::Config("max_frame_len must be at least 1".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(RelayError::Config("write_timeout must be at least 1 second".into()));
        }
        Ok(())
    }

    /// `host:port` string to bind the listener on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(Some(&dir.path().join("absent.toml")), None, None).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.inbound_queue, 64);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn file_values_then_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nbind = \"127.0.0.1\"\nport = 9000\ninbound_queue = 2\nwrite_timeout = 3"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path()), None, None).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.inbound_queue, 2);
        assert_eq!(config.outbound_queue, 64);
        assert_eq!(config.write_timeout, Duration::from_secs(3));

        let config = ServerConfig::load(Some(file.path()), Some("::1"), Some(7000)).unwrap();
        assert_eq!(config.bind, "::1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.inbound_queue, 2);
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\noutbound_queue = 0").unwrap();
        let err = ServerConfig::load(Some(file.path()), None, None).unwrap_err();
        assert!(matches!(err, RelayError::Config(ref msg) if msg.contains("outbound_queue")));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = ServerConfig::load(Some(file.path()), None, None).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
