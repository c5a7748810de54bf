//! Gateway configuration types.
//!
//! [`GatewayConfig`] is the single source of truth for all runtime settings.
//! It is a plain struct: the config file loader and the CLI fill it in, the
//! domain never reads the environment itself.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rover_core::{OtaConfig, OtaError, ProtocolRevision};
use thiserror::Error;

/// A combination of settings the gateway cannot run with.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvalidConfig {
    #[error("sweep interval {sweep:?} must be shorter than the device timeout {timeout:?}")]
    SweepNotShorterThanTimeout { sweep: Duration, timeout: Duration },

    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error(transparent)]
    Ota(#[from] OtaError),
}

/// All runtime configuration for the gateway.
///
/// # Example
///
/// ```rust
/// use rover_gateway::domain::GatewayConfig;
///
/// let cfg = GatewayConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8081);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Address the WebSocket server binds to.
    pub ws_bind_addr: SocketAddr,

    /// Address the UDP socket binds to.  Devices broadcast presence and send
    /// status frames to this port.
    pub device_listen_addr: SocketAddr,

    /// UDP port commands are sent to on the device.
    pub device_send_port: u16,

    /// Silence after which a device is reported lost.
    pub device_timeout: Duration,

    /// Period of the registry timeout sweep.
    pub sweep_interval: Duration,

    /// Frame layout spoken by the deployed firmware.
    pub revision: ProtocolRevision,

    /// Outbound messages buffered per client before further broadcasts to
    /// that client are skipped.
    pub client_queue_depth: usize,

    /// Interval between WebSocket pings on each client session.
    pub keepalive_interval: Duration,

    pub ota: OtaConfig,
}

impl Default for GatewayConfig {
    /// | Field                | Default        |
    /// |----------------------|----------------|
    /// | ws_bind_addr         | `0.0.0.0:8081` |
    /// | device_listen_addr   | `0.0.0.0:8889` |
    /// | device_send_port     | 8888           |
    /// | device_timeout       | 20 seconds     |
    /// | sweep_interval       | 5 seconds      |
    /// | revision             | V2             |
    /// | client_queue_depth   | 64             |
    /// | keepalive_interval   | 15 seconds     |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8081)),
            device_listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8889)),
            device_send_port: 8888,
            device_timeout: Duration::from_secs(20),
            sweep_interval: Duration::from_secs(5),
            revision: ProtocolRevision::default(),
            client_queue_depth: 64,
            keepalive_interval: Duration::from_secs(15),
            ota: OtaConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Checks the settings against each other.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.device_timeout.is_zero() {
            return Err(InvalidConfig::Zero("device timeout"));
        }
        if self.sweep_interval.is_zero() {
            return Err(InvalidConfig::Zero("sweep interval"));
        }
        if self.sweep_interval >= self.device_timeout {
            return Err(InvalidConfig::SweepNotShorterThanTimeout {
                sweep: self.sweep_interval,
                timeout: self.device_timeout,
            });
        }
        if self.client_queue_depth == 0 {
            return Err(InvalidConfig::Zero("client queue depth"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(InvalidConfig::Zero("keepalive interval"));
        }
        self.ota.validate()?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports_match_device_firmware() {
        // Arrange / Act
        let cfg = GatewayConfig::default();
        // Assert
        assert_eq!(cfg.ws_bind_addr.port(), 8081);
        assert_eq!(cfg.device_listen_addr.port(), 8889);
        assert_eq!(cfg.device_send_port, 8888);
    }

    #[test]
    fn test_default_timeouts() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.device_timeout, Duration::from_secs(20));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.revision, ProtocolRevision::V2);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(GatewayConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_sweep_not_shorter_than_timeout_is_rejected() {
        // Arrange
        let cfg = GatewayConfig {
            sweep_interval: Duration::from_secs(20),
            ..GatewayConfig::default()
        };

        // Act
        let result = cfg.validate();

        // Assert
        assert!(matches!(
            result,
            Err(InvalidConfig::SweepNotShorterThanTimeout { .. })
        ));
    }

    #[test]
    fn test_zero_queue_depth_is_rejected() {
        let cfg = GatewayConfig {
            client_queue_depth: 0,
            ..GatewayConfig::default()
        };
        assert_eq!(cfg.validate(), Err(InvalidConfig::Zero("client queue depth")));
    }

    #[test]
    fn test_invalid_ota_settings_are_reported() {
        let mut cfg = GatewayConfig::default();
        cfg.ota.fallback_chunk_size = 4096;
        assert!(matches!(cfg.validate(), Err(InvalidConfig::Ota(_))));
    }
}
