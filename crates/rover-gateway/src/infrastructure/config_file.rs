//! Optional TOML configuration file.
//!
//! Every key is optional; absent keys keep the [`GatewayConfig`] defaults.
//! Durations are written in milliseconds.  Example:
//!
//! ```toml
//! [network]
//! ws_bind = "0.0.0.0:8081"
//! device_listen = "0.0.0.0:8889"
//! device_send_port = 8888
//!
//! [devices]
//! revision = "v3"
//! timeout_ms = 20000
//!
//! [ota]
//! primary_chunk_size = 1400
//! ack_timeout_ms = 1500
//! ```
//!
//! The loader does not validate the result: CLI and environment overrides
//! are applied on top first, then the binary calls
//! [`GatewayConfig::validate`] once.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_core::protocol::revision::UnknownRevision;
use rover_core::{OtaConfig, ProtocolRevision};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::GatewayConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Revision(#[from] UnknownRevision),
}

// ── File schema ───────────────────────────────────────────────────────────────

/// On-disk layout of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub network: NetworkSection,
    pub devices: DevicesSection,
    pub ota: OtaSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSection {
    pub ws_bind: SocketAddr,
    pub device_listen: SocketAddr,
    pub device_send_port: u16,
    pub client_queue_depth: usize,
    pub keepalive_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevicesSection {
    /// `"v1"`, `"v2"` or `"v3"`.
    pub revision: String,
    pub timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaSection {
    pub primary_chunk_size: usize,
    pub fallback_chunk_size: usize,
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    pub fast_fail_retries: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig::from(&GatewayConfig::default())
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        FileConfig::default().network
    }
}

impl Default for DevicesSection {
    fn default() -> Self {
        FileConfig::default().devices
    }
}

impl Default for OtaSection {
    fn default() -> Self {
        FileConfig::default().ota
    }
}

impl From<&GatewayConfig> for FileConfig {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            network: NetworkSection {
                ws_bind: cfg.ws_bind_addr,
                device_listen: cfg.device_listen_addr,
                device_send_port: cfg.device_send_port,
                client_queue_depth: cfg.client_queue_depth,
                keepalive_ms: millis(cfg.keepalive_interval),
            },
            devices: DevicesSection {
                revision: cfg.revision.as_str().to_string(),
                timeout_ms: millis(cfg.device_timeout),
                sweep_interval_ms: millis(cfg.sweep_interval),
            },
            ota: OtaSection {
                primary_chunk_size: cfg.ota.primary_chunk_size,
                fallback_chunk_size: cfg.ota.fallback_chunk_size,
                ack_timeout_ms: millis(cfg.ota.ack_timeout),
                max_retries: cfg.ota.max_retries,
                fast_fail_retries: cfg.ota.fast_fail_retries,
            },
        }
    }
}

impl TryFrom<FileConfig> for GatewayConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let revision: ProtocolRevision = file.devices.revision.parse()?;
        Ok(GatewayConfig {
            ws_bind_addr: file.network.ws_bind,
            device_listen_addr: file.network.device_listen,
            device_send_port: file.network.device_send_port,
            device_timeout: Duration::from_millis(file.devices.timeout_ms),
            sweep_interval: Duration::from_millis(file.devices.sweep_interval_ms),
            revision,
            client_queue_depth: file.network.client_queue_depth,
            keepalive_interval: Duration::from_millis(file.network.keepalive_ms),
            ota: OtaConfig {
                primary_chunk_size: file.ota.primary_chunk_size,
                fallback_chunk_size: file.ota.fallback_chunk_size,
                ack_timeout: Duration::from_millis(file.ota.ack_timeout_ms),
                max_retries: file.ota.max_retries,
                fast_fail_retries: file.ota.fast_fail_retries,
            },
        })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parses configuration text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML and
/// [`ConfigError::Revision`] for an unknown revision name.
pub fn parse_config(text: &str) -> Result<GatewayConfig, ConfigError> {
    let file: FileConfig = toml::from_str(text)?;
    GatewayConfig::try_from(file)
}

/// Loads the configuration file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
/// [`parse_config`].
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Renders `config` in the file format, e.g. for `--print-config`.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if serialization fails.
pub fn render_config(config: &GatewayConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(&FileConfig::from(config))?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_empty_file_yields_defaults() {
        // Arrange / Act
        let cfg = assert_ok!(parse_config(""));

        // Assert
        assert_eq!(cfg, GatewayConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_named_keys() {
        // Arrange
        let text = r#"
[devices]
revision = "v3"
timeout_ms = 30000
"#;

        // Act
        let cfg = parse_config(text).unwrap();

        // Assert
        assert_eq!(cfg.revision, ProtocolRevision::V3);
        assert_eq!(cfg.device_timeout, Duration::from_secs(30));
        // Unspecified fields keep their defaults
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.ws_bind_addr.port(), 8081);
    }

    #[test]
    fn test_network_and_ota_sections() {
        let text = r#"
[network]
ws_bind = "127.0.0.1:9000"
device_send_port = 7777
keepalive_ms = 5000

[ota]
primary_chunk_size = 1024
ack_timeout_ms = 800
"#;

        let cfg = parse_config(text).unwrap();

        assert_eq!(cfg.ws_bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.device_send_port, 7777);
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(5));
        assert_eq!(cfg.ota.primary_chunk_size, 1024);
        assert_eq!(cfg.ota.fallback_chunk_size, 512);
        assert_eq!(cfg.ota.ack_timeout, Duration::from_millis(800));
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let err = assert_err!(parse_config("[[[ not valid toml"));
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_revision_is_rejected() {
        let result = parse_config("[devices]\nrevision = \"v9\"\n");
        assert!(matches!(result, Err(ConfigError::Revision(_))));
    }

    #[test]
    fn test_render_then_parse_preserves_settings() {
        // Arrange
        let mut cfg = GatewayConfig::default();
        cfg.revision = ProtocolRevision::V1;
        cfg.device_send_port = 9999;

        // Act
        let text = assert_ok!(render_config(&cfg));
        let restored = assert_ok!(parse_config(&text));

        // Assert
        assert_eq!(restored, cfg);
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/rover.toml");

        let err = load_config(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Io { path: ref p, .. } if *p == path));
    }

    #[test]
    fn test_load_config_from_temp_file() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("rover_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rover.toml");
        std::fs::write(&path, "[devices]\nsweep_interval_ms = 1000\n").unwrap();

        // Act
        let cfg = load_config(&path).unwrap();

        // Assert
        assert_eq!(cfg.sweep_interval, Duration::from_secs(1));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
