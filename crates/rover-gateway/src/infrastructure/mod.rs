//! Infrastructure layer for rover-gateway.
//!
//! The infrastructure layer handles all I/O: the device-facing UDP socket,
//! WebSocket sessions with clients, and the reactor task that owns the
//! gateway state and carries out the effects the application layer returns.
//!
//! # Responsibilities
//!
//! - Binding the UDP socket and running its receive loop
//! - Accepting WebSocket connections and running per-session tasks
//! - Fanning server messages out to client queues without blocking
//! - Driving the registry sweep and OTA acknowledgment timers
//! - Loading the optional TOML configuration file
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Frame layouts and OTA state (that is `rover-core`)
//! - Command translation (that is the application layer)
//! - CLI parsing (that is done in `main.rs`)

pub mod client_hub;
pub mod config_file;
pub mod reactor;
pub mod runtime;
pub mod udp_link;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use config_file::{load_config, render_config, ConfigError};
pub use reactor::{GatewayEvent, Reactor};
pub use runtime::{start_gateway, GatewayHandle};
