//! # rover-core
//!
//! Protocol and domain logic shared by the rover gateway and its test
//! simulators.  Nothing in this crate touches a socket, a clock source or an
//! async runtime: every function takes its inputs (bytes, `Instant`s, acks)
//! explicitly and returns plain values, so the whole gateway core can be
//! exercised deterministically from unit tests.
//!
//! - **`protocol`** – How bytes travel over UDP.  Fixed control frames and
//!   length-prefixed frames, both closed by an 8-bit additive checksum, with
//!   the frame layout selected by a [`ProtocolRevision`].
//!
//! - **`domain`** – The device registry (presence tracking with a timeout
//!   sweep) and the OTA transfer engine (a lock-step, acknowledgment-driven
//!   state machine with retry and chunk-size fallback).

pub mod domain;
pub mod protocol;

pub use domain::device::{DeviceId, DeviceMode, DeviceStatus};
pub use domain::ota::{OtaAction, OtaConfig, OtaError, OtaFailure, OtaOutcome, OtaPhase, OtaSession};
pub use domain::registry::{DeviceEntry, DeviceRegistry, Observation, Sighting};
pub use protocol::codec::{
    checksum8, decode_control, decode_framed, encode_control, encode_framed, ControlFrame,
    FrameType, FramedPacket, ProtocolError,
};
pub use protocol::inbound::{parse_datagram, InboundFrame};
pub use protocol::payloads::{
    MacAddr, OtaAck, OtaDeviceState, OtaDeviceStatus, OtaResultCode, WifiAck, WifiCredentials,
    WifiOp,
};
pub use protocol::revision::ProtocolRevision;
