//! Application layer for rover-gateway.
//!
//! Knows *what* the gateway does with every event and leaves *how* bytes
//! move to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - Translating client JSON messages into device frames and device frames
//!   into client JSON messages
//! - The [`GatewayCore`] state machine: registry updates, discovery and loss
//!   notifications, snapshot replay, OTA sessions
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - Tokio task spawning, channels and timers
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod command_translation;
pub mod gateway_service;

pub use command_translation::{
    encode_pid_value, translate_binary_frame, translate_client_message, ClientRequest,
    CommandError, DeviceCommand,
};
pub use gateway_service::{Effect, GatewayCore};
