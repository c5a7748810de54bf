//! Rover UDP wire protocol: frame codec, typed payloads and frame builders.

pub mod codec;
pub mod inbound;
pub mod outbound;
pub mod payloads;
pub mod revision;

pub use codec::{
    checksum8, decode_control, decode_framed, encode_control, encode_framed, ControlFrame,
    FrameType, FramedPacket, ProtocolError,
};
pub use inbound::{parse_datagram, InboundFrame};
pub use payloads::{
    MacAddr, OtaAck, OtaDeviceState, OtaDeviceStatus, OtaResultCode, WifiAck, WifiCredentials,
    WifiOp,
};
pub use revision::ProtocolRevision;
