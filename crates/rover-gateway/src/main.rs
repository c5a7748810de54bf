//! Rover gateway: entry point.
//!
//! Listens for rover devices on UDP, serves WebSocket clients, and relays
//! between the two: discovery and loss notifications, live status, remote
//! control commands, PID tuning, WiFi provisioning and OTA firmware updates.
//!
//! # Usage
//!
//! ```text
//! rover-gateway [OPTIONS]
//!
//! Options:
//!   --config <PATH>               TOML configuration file
//!   --ws-bind <ADDR>              WebSocket listen address [default: 0.0.0.0:8081]
//!   --device-listen <ADDR>        UDP listen address [default: 0.0.0.0:8889]
//!   --device-port <PORT>          Device command port [default: 8888]
//!   --device-timeout-ms <MS>      Silence before a device is lost [default: 20000]
//!   --sweep-interval-ms <MS>      Registry sweep period [default: 5000]
//!   --protocol <v1|v2|v3>         Device frame layout [default: v2]
//!   --keepalive-ms <MS>           WebSocket ping interval [default: 15000]
//!   --ota-chunk-size <BYTES>      Primary OTA chunk [default: 1400]
//!   --ota-fallback-chunk-size <BYTES>  Fallback OTA chunk [default: 512]
//!   --ota-ack-timeout-ms <MS>     OTA acknowledgment timeout [default: 1500]
//!   --ota-max-retries <N>         Resends per OTA frame [default: 5]
//!   --print-config                Print the effective configuration and exit
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the `--config` file, then environment variables
//! and flags.  A flag wins over its environment variable.
//!
//! | Variable                     | Flag                        |
//! |------------------------------|-----------------------------|
//! | `ROVER_CONFIG`               | `--config`                  |
//! | `ROVER_WS_BIND`              | `--ws-bind`                 |
//! | `ROVER_DEVICE_LISTEN`        | `--device-listen`           |
//! | `ROVER_DEVICE_PORT`          | `--device-port`             |
//! | `ROVER_DEVICE_TIMEOUT_MS`    | `--device-timeout-ms`       |
//! | `ROVER_SWEEP_INTERVAL_MS`    | `--sweep-interval-ms`       |
//! | `ROVER_PROTOCOL`             | `--protocol`                |
//! | `ROVER_KEEPALIVE_MS`         | `--keepalive-ms`            |
//! | `ROVER_OTA_CHUNK_SIZE`       | `--ota-chunk-size`          |
//! | `ROVER_OTA_FALLBACK_CHUNK_SIZE` | `--ota-fallback-chunk-size` |
//! | `ROVER_OTA_ACK_TIMEOUT_MS`   | `--ota-ack-timeout-ms`      |
//! | `ROVER_OTA_MAX_RETRIES`      | `--ota-max-retries`         |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rover_core::ProtocolRevision;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rover_gateway::domain::GatewayConfig;
use rover_gateway::infrastructure::{load_config, render_config, start_gateway};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-UDP gateway for rover devices.
#[derive(Debug, Parser)]
#[command(
    name = "rover-gateway",
    about = "WebSocket-to-UDP gateway for rover devices",
    version
)]
struct Cli {
    /// TOML configuration file.  Flags and environment variables override it.
    #[arg(long, env = "ROVER_CONFIG")]
    config: Option<PathBuf>,

    /// Address the WebSocket server listens on.
    #[arg(long, env = "ROVER_WS_BIND")]
    ws_bind: Option<SocketAddr>,

    /// Address the device UDP socket binds to.
    #[arg(long, env = "ROVER_DEVICE_LISTEN")]
    device_listen: Option<SocketAddr>,

    /// UDP port commands are sent to on each device.
    #[arg(long, env = "ROVER_DEVICE_PORT")]
    device_port: Option<u16>,

    /// Milliseconds of silence after which a device is reported lost.
    #[arg(long, env = "ROVER_DEVICE_TIMEOUT_MS")]
    device_timeout_ms: Option<u64>,

    /// Milliseconds between registry sweeps.
    #[arg(long, env = "ROVER_SWEEP_INTERVAL_MS")]
    sweep_interval_ms: Option<u64>,

    /// Frame layout spoken by the device firmware (`v1`, `v2` or `v3`).
    #[arg(long, env = "ROVER_PROTOCOL")]
    protocol: Option<ProtocolRevision>,

    /// Milliseconds between WebSocket keepalive pings.
    #[arg(long, env = "ROVER_KEEPALIVE_MS")]
    keepalive_ms: Option<u64>,

    /// OTA data chunk size tried first.
    #[arg(long, env = "ROVER_OTA_CHUNK_SIZE")]
    ota_chunk_size: Option<usize>,

    /// OTA chunk size used when the first primary-size chunk keeps timing out.
    #[arg(long, env = "ROVER_OTA_FALLBACK_CHUNK_SIZE")]
    ota_fallback_chunk_size: Option<usize>,

    /// Milliseconds to wait for each OTA acknowledgment.
    #[arg(long, env = "ROVER_OTA_ACK_TIMEOUT_MS")]
    ota_ack_timeout_ms: Option<u64>,

    /// Resends allowed per OTA frame.
    #[arg(long, env = "ROVER_OTA_MAX_RETRIES")]
    ota_max_retries: Option<u32>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Builds the effective [`GatewayConfig`]: defaults, then the config
    /// file, then every flag that was given.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the resulting
    /// settings are inconsistent.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => GatewayConfig::default(),
        };

        if let Some(addr) = self.ws_bind {
            config.ws_bind_addr = addr;
        }
        if let Some(addr) = self.device_listen {
            config.device_listen_addr = addr;
        }
        if let Some(port) = self.device_port {
            config.device_send_port = port;
        }
        if let Some(ms) = self.device_timeout_ms {
            config.device_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.sweep_interval_ms {
            config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(revision) = self.protocol {
            config.revision = revision;
        }
        if let Some(ms) = self.keepalive_ms {
            config.keepalive_interval = Duration::from_millis(ms);
        }
        if let Some(size) = self.ota_chunk_size {
            config.ota.primary_chunk_size = size;
        }
        if let Some(size) = self.ota_fallback_chunk_size {
            config.ota.fallback_chunk_size = size;
        }
        if let Some(ms) = self.ota_ack_timeout_ms {
            config.ota.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = self.ota_max_retries {
            config.ota.max_retries = retries;
        }

        config.validate().context("invalid gateway configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let print_config = cli.print_config;
    let config = cli.into_gateway_config()?;

    if print_config {
        print!("{}", render_config(&config)?);
        return Ok(());
    }

    info!(
        "rover gateway starting: ws={}, devices={}, device port={}, protocol={}",
        config.ws_bind_addr, config.device_listen_addr, config.device_send_port, config.revision
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let gateway = start_gateway(&config, running).await?;
    gateway.wait().await;

    info!("rover gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
