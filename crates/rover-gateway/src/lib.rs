//! rover-gateway library crate.
//!
//! This crate bridges WebSocket clients (browsers, scripts) and rover devices
//! speaking the compact UDP frame protocol of `rover-core`.  It discovers
//! devices, relays their telemetry, forwards remote-control commands and
//! drives over-the-air firmware updates.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Client (JSON over WebSocket)
//!         ↕
//! [rover-gateway]
//!   ├── domain/           Pure types: JSON message enums, GatewayConfig, ClientId
//!   ├── application/      Translation JSON ↔ frames, GatewayCore state machine
//!   └── infrastructure/
//!         ├── ws_server/  WebSocket accept loop (tokio-tungstenite)
//!         ├── udp_link/   Device socket and receive loop
//!         ├── reactor/    Single task owning the core, hub and timers
//!         └── config_file/ Optional TOML configuration
//!         ↕
//! Rover devices (binary frames over UDP)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `rover-core` only; its handlers
//!   return effects instead of performing them.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: pure business-logic types (no I/O).
pub mod domain;

/// Application layer: message translation and the gateway state machine.
pub mod application;

/// Infrastructure layer: sockets, sessions, the reactor task and config loading.
pub mod infrastructure;
