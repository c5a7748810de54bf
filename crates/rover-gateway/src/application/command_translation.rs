//! Translation between client JSON messages and device frames.
//!
//! Everything here is a pure function: no sockets, no clocks, no async.
//!
//! ```text
//! Client → Device:  ClientMessage → ClientRequest (frame or OTA engine request)
//!                   call: translate_client_message()
//!                   binary 0xF0 frame → DeviceCommand
//!                   call: translate_binary_frame()
//!
//! Device → Client:  InboundFrame pieces → ServerMessage
//!                   call: discovered_message(), status_message(), ...
//! ```

use std::net::{IpAddr, Ipv4Addr};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use rover_core::protocol::outbound;
use rover_core::{
    DeviceEntry, DeviceMode, DeviceStatus, FrameType, MacAddr, OtaAck, ProtocolError,
    ProtocolRevision, WifiAck, WifiCredentials,
};

use crate::domain::messages::{
    ClientMessage, DeviceInfo, OtaStatusPayload, ServerMessage, StatusPayload,
};

/// First byte of a binary WebSocket frame carrying a raw OTA chunk.
pub const BINARY_OTA_MARKER: u8 = 0xF0;

/// `marker(1) offset(4) ip(4)` before the chunk bytes.
const BINARY_OTA_HEADER_LEN: usize = 9;

// ── Error type ────────────────────────────────────────────────────────────────

/// Reasons a client request cannot be turned into a device frame.
///
/// These are malformed-input failures; the gateway logs them, answers the
/// client with an `error` message and keeps the connection open.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("invalid device address '{0}'")]
    InvalidDeviceAddress(String),

    #[error("{field} {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    #[error("unknown parameter type {0}")]
    UnknownParamType(u8),

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("{frame_type:?} frames are not supported by protocol {revision}")]
    Unsupported {
        frame_type: FrameType,
        revision: ProtocolRevision,
    },

    #[error("binary frame of {0} bytes is shorter than its header")]
    ShortBinaryFrame(usize),

    #[error("unknown binary frame marker 0x{0:02X}")]
    UnknownBinaryMarker(u8),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// One datagram for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub device: IpAddr,
    pub frame: Vec<u8>,
}

/// What a client message asks the gateway to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// Send a single frame.
    Forward(DeviceCommand),
    /// Run an engine-driven OTA transfer of `image`.
    StartUpload { device: IpAddr, image: Vec<u8> },
    /// Tear down the engine-driven transfer to `device`.
    AbortUpload { device: IpAddr },
}

// ── Field validation ──────────────────────────────────────────────────────────

pub fn parse_device_ip(raw: &str) -> Result<IpAddr, CommandError> {
    raw.trim()
        .parse()
        .map_err(|_| CommandError::InvalidDeviceAddress(raw.to_string()))
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, CommandError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(CommandError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Motor speed as the signed byte sent on the wire.
pub fn motor_speed(field: &'static str, value: f64) -> Result<i8, CommandError> {
    Ok(in_range(field, value, -100.0, 100.0)?.round() as i8)
}

pub fn servo_angle(value: f64) -> Result<u8, CommandError> {
    Ok(in_range("servo", value, 0.0, 180.0)?.round() as u8)
}

/// Wire value of a tuning parameter.
///
/// Types 1–3 (Kp, Ki, Kd) are sent ×100 and rounded; type 4 (speed) is sent
/// as an integer.  Negative values travel as 16-bit two's complement.
///
/// # Example
///
/// ```rust
/// use rover_gateway::application::encode_pid_value;
///
/// assert_eq!(encode_pid_value(1, 1.5).unwrap(), 150);
/// assert_eq!(encode_pid_value(4, 300.0).unwrap(), 300);
/// ```
pub fn encode_pid_value(param_type: u8, value: f64) -> Result<u16, CommandError> {
    let scaled = match param_type {
        1..=3 => (value * 100.0).round(),
        4 => value.trunc(),
        other => return Err(CommandError::UnknownParamType(other)),
    };
    let wire = in_range("value", scaled, f64::from(i16::MIN), f64::from(u16::MAX))?;
    Ok((wire as i32) as u16)
}

fn decode_base64(data: &str) -> Result<Vec<u8>, CommandError> {
    BASE64
        .decode(data.trim())
        .map_err(|e| CommandError::InvalidBase64(e.to_string()))
}

fn require(revision: ProtocolRevision, frame_type: FrameType) -> Result<(), CommandError> {
    if revision.supports(frame_type) {
        Ok(())
    } else {
        Err(CommandError::Unsupported {
            frame_type,
            revision,
        })
    }
}

// ── Client → Device translation ──────────────────────────────────────────────

/// Translates a client message into a request for the gateway core.
///
/// # Errors
///
/// Returns [`CommandError`] for a bad device address, an out-of-range field,
/// undecodable base64, or a frame type the configured revision lacks.
///
/// # Example
///
/// ```rust
/// use rover_core::ProtocolRevision;
/// use rover_gateway::application::{translate_client_message, ClientRequest};
/// use rover_gateway::domain::ClientMessage;
///
/// let msg = ClientMessage::OtaQuery { device_ip: "192.168.4.2".into() };
/// let req = translate_client_message(ProtocolRevision::V2, &msg).unwrap();
/// assert!(matches!(req, ClientRequest::Forward(_)));
/// ```
pub fn translate_client_message(
    revision: ProtocolRevision,
    msg: &ClientMessage,
) -> Result<ClientRequest, CommandError> {
    let device = parse_device_ip(msg.device_ip())?;
    let forward = |frame: Vec<u8>| -> Result<ClientRequest, CommandError> {
        Ok(ClientRequest::Forward(DeviceCommand { device, frame }))
    };

    match msg {
        ClientMessage::Control {
            motor1,
            motor2,
            servo,
            ..
        } => {
            let frame = outbound::motion(
                revision,
                motor_speed("motor1", *motor1)?,
                motor_speed("motor2", *motor2)?,
                servo_angle(*servo)?,
            )?;
            forward(frame)
        }

        ClientMessage::ModeChange { mode, .. } => {
            let mode: DeviceMode = mode
                .parse()
                .map_err(|_| CommandError::UnknownMode(mode.clone()))?;
            forward(outbound::mode_change(revision, mode)?)
        }

        ClientMessage::SetPid {
            param_type, value, ..
        } => {
            let wire = encode_pid_value(*param_type, *value)?;
            forward(outbound::set_param(revision, *param_type, wire)?)
        }

        ClientMessage::OtaStart { size, .. } => {
            require(revision, FrameType::OtaStart)?;
            forward(outbound::ota_start(*size)?)
        }

        ClientMessage::OtaData { offset, data, .. } => {
            require(revision, FrameType::OtaData)?;
            forward(outbound::ota_data(*offset, &decode_base64(data)?)?)
        }

        ClientMessage::OtaEnd { .. } => {
            require(revision, FrameType::OtaEnd)?;
            forward(outbound::ota_end()?)
        }

        ClientMessage::OtaQuery { .. } => {
            require(revision, FrameType::OtaQuery)?;
            forward(outbound::ota_query()?)
        }

        ClientMessage::OtaUpload { data, .. } => {
            require(revision, FrameType::OtaStart)?;
            Ok(ClientRequest::StartUpload {
                device,
                image: decode_base64(data)?,
            })
        }

        ClientMessage::OtaAbort { .. } => Ok(ClientRequest::AbortUpload { device }),

        ClientMessage::WifiConfigSet { ssid, password, .. } => {
            require(revision, FrameType::WifiSet)?;
            let credentials = WifiCredentials::new(ssid.as_str(), password.as_str())?;
            forward(outbound::wifi_set(&credentials)?)
        }

        ClientMessage::WifiConfigConnect { .. } => {
            require(revision, FrameType::WifiConnect)?;
            forward(outbound::wifi_connect()?)
        }

        ClientMessage::WifiConfigGet { .. } => {
            require(revision, FrameType::WifiGet)?;
            forward(outbound::wifi_get()?)
        }
    }
}

/// Translates a binary WebSocket frame into an OTA data frame.
///
/// Layout: `0xF0, offset(u32 BE), device IPv4(4), chunk…`.
pub fn translate_binary_frame(
    revision: ProtocolRevision,
    bytes: &[u8],
) -> Result<DeviceCommand, CommandError> {
    if bytes.len() < BINARY_OTA_HEADER_LEN {
        return Err(CommandError::ShortBinaryFrame(bytes.len()));
    }
    if bytes[0] != BINARY_OTA_MARKER {
        return Err(CommandError::UnknownBinaryMarker(bytes[0]));
    }
    require(revision, FrameType::OtaData)?;

    let offset = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let device = IpAddr::V4(Ipv4Addr::new(bytes[5], bytes[6], bytes[7], bytes[8]));
    let frame = outbound::ota_data(offset, &bytes[BINARY_OTA_HEADER_LEN..])?;
    Ok(DeviceCommand { device, frame })
}

// ── Device → Client translation ──────────────────────────────────────────────

pub fn discovered_message(ip: IpAddr, mac: Option<MacAddr>) -> ServerMessage {
    ServerMessage::DeviceDiscovered {
        device: DeviceInfo {
            ip: ip.to_string(),
            mac: mac.map(|m| m.to_string()),
        },
    }
}

pub fn lost_message(entry: &DeviceEntry) -> ServerMessage {
    ServerMessage::DeviceLost {
        ip: entry.ip().to_string(),
        mac: entry.mac.map(|m| m.to_string()),
    }
}

pub fn status_message(ip: IpAddr, status: &DeviceStatus) -> ServerMessage {
    ServerMessage::StatusUpdate {
        ip: ip.to_string(),
        status: StatusPayload {
            mode: status.mode as u8,
            servo: status.servo,
            distance: status.distance,
            ir: status.ir,
        },
    }
}

pub fn ota_response_message(ip: IpAddr, ack: &OtaAck) -> ServerMessage {
    ServerMessage::OtaResponse {
        ip: ip.to_string(),
        code: ack.code,
        offset: ack.offset,
        status: ack.status.map(|s| OtaStatusPayload {
            ota_status: s.ota_status,
            progress: s.progress,
            received: s.received,
            total: s.total,
        }),
    }
}

pub fn wifi_response_message(ip: IpAddr, ack: &WifiAck) -> ServerMessage {
    ServerMessage::WifiConfigResponse {
        ip: ip.to_string(),
        op: ack.op.as_str().to_string(),
        code: ack.code,
        ssid: ack.ssid.clone(),
        connected: ack.connected,
    }
}

pub fn error_message(message: impl Into<String>, ip: Option<IpAddr>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
        ip: ip.map(|ip| ip.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
