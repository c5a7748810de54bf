//! Domain layer for rover-gateway.
//!
//! Pure types with no I/O: the JSON "language" spoken with clients, client
//! session identity and the runtime configuration.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `UdpSocket`, or `WebSocket` types
//! - File I/O or environment variable reading
//! - Anything that could block or fail due to external state

pub mod client;
pub mod config;
pub mod messages;

pub use client::ClientId;
pub use config::{GatewayConfig, InvalidConfig};
pub use messages::{ClientMessage, DeviceInfo, OtaStatusPayload, ServerMessage, StatusPayload};
