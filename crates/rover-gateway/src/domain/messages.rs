//! JSON message types for the client-facing WebSocket protocol.
//!
//! Devices speak a compact binary protocol over UDP; browsers speak JSON.
//! The gateway exposes a JSON view of the device protocol so the front end
//! never has to build a frame or compute a checksum.
//!
//! # Message flow
//!
//! ```text
//! Client  → Gateway: JSON text frame → ClientMessage → binary frame → UDP
//! Gateway → Client:  UDP datagram → InboundFrame → ServerMessage → JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object whose `"type"` field names the variant in
//! camelCase; the remaining fields sit in the same object:
//!
//! ```json
//! {"type":"control","deviceIP":"192.168.4.2","motor1":60,"motor2":60,"servo":90}
//! ```
//!
//! Device addresses are kept as strings here; the application layer parses
//! them so a bad address becomes a logged [`CommandError`] instead of a
//! deserialization failure that hides which field was wrong.
//!
//! [`CommandError`]: crate::application::CommandError

use serde::{Deserialize, Serialize};

fn default_servo() -> f64 {
    90.0
}

// ── Client → Gateway ──────────────────────────────────────────────────────────

/// Every message a client can send to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Drive the motors and steering servo.
    Control {
        #[serde(rename = "deviceIP")]
        device_ip: String,
        /// Left motor speed, -100..=100.
        motor1: f64,
        /// Right motor speed, -100..=100.
        motor2: f64,
        /// Steering angle in degrees, 0..=180.
        #[serde(default = "default_servo")]
        servo: f64,
    },

    /// Switch the operating mode by name: standby, tracking, avoid or remote.
    ModeChange {
        #[serde(rename = "deviceIP")]
        device_ip: String,
        mode: String,
    },

    /// Set a tuning parameter.
    ///
    /// Types 1–3 are the PID gains (sent ×100), type 4 a raw integer.
    SetPid {
        #[serde(rename = "deviceIP")]
        device_ip: String,
        #[serde(rename = "paramType")]
        param_type: u8,
        value: f64,
    },

    /// Raw OTA start frame; the client drives the transfer itself.
    OtaStart {
        #[serde(rename = "deviceIP")]
        device_ip: String,
        size: u32,
    },

    /// Raw OTA data frame with a base64 chunk.
    OtaData {
        #[serde(rename = "deviceIP")]
        device_ip: String,
        offset: u32,
        data: String,
    },

    OtaEnd {
        #[serde(rename = "deviceIP")]
        device_ip: String,
    },

    OtaQuery {
        #[serde(rename = "deviceIP")]
        device_ip: String,
    },

    /// Hand a whole base64 image to the gateway's transfer engine.
    OtaUpload {
        #[serde(rename = "deviceIP")]
        device_ip: String,
        data: String,
    },

    /// Cancel the engine-driven transfer to a device.
    OtaAbort {
        #[serde(rename = "deviceIP")]
        device_ip: String,
    },

    WifiConfigSet {
        #[serde(rename = "deviceIP")]
        device_ip: String,
        ssid: String,
        #[serde(default)]
        password: String,
    },

    WifiConfigConnect {
        #[serde(rename = "deviceIP")]
        device_ip: String,
    },

    WifiConfigGet {
        #[serde(rename = "deviceIP")]
        device_ip: String,
    },
}

impl ClientMessage {
    /// The target device address exactly as the client sent it.
    pub fn device_ip(&self) -> &str {
        match self {
            ClientMessage::Control { device_ip, .. }
            | ClientMessage::ModeChange { device_ip, .. }
            | ClientMessage::SetPid { device_ip, .. }
            | ClientMessage::OtaStart { device_ip, .. }
            | ClientMessage::OtaData { device_ip, .. }
            | ClientMessage::OtaEnd { device_ip }
            | ClientMessage::OtaQuery { device_ip }
            | ClientMessage::OtaUpload { device_ip, .. }
            | ClientMessage::OtaAbort { device_ip }
            | ClientMessage::WifiConfigSet { device_ip, .. }
            | ClientMessage::WifiConfigConnect { device_ip }
            | ClientMessage::WifiConfigGet { device_ip } => device_ip,
        }
    }

    /// The JSON `type` value, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Control { .. } => "control",
            ClientMessage::ModeChange { .. } => "modeChange",
            ClientMessage::SetPid { .. } => "setPid",
            ClientMessage::OtaStart { .. } => "otaStart",
            ClientMessage::OtaData { .. } => "otaData",
            ClientMessage::OtaEnd { .. } => "otaEnd",
            ClientMessage::OtaQuery { .. } => "otaQuery",
            ClientMessage::OtaUpload { .. } => "otaUpload",
            ClientMessage::OtaAbort { .. } => "otaAbort",
            ClientMessage::WifiConfigSet { .. } => "wifiConfigSet",
            ClientMessage::WifiConfigConnect { .. } => "wifiConfigConnect",
            ClientMessage::WifiConfigGet { .. } => "wifiConfigGet",
        }
    }
}

// ── Gateway → Client ──────────────────────────────────────────────────────────

/// A device as announced in `deviceDiscovered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Decoded sensor snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Mode number: standby 0, tracking 1, avoid 2, remote 3.
    pub mode: u8,
    pub servo: u8,
    pub distance: f32,
    /// `[left, middle, right]`, each 0 or 1.
    pub ir: [u8; 3],
}

/// Status block embedded in a long OTA acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtaStatusPayload {
    #[serde(rename = "otaStatus")]
    pub ota_status: u8,
    pub progress: u8,
    pub received: u32,
    pub total: u32,
}

/// Every message the gateway sends to clients.
///
/// # Serde representation
///
/// ```json
/// {"type":"deviceDiscovered","device":{"ip":"192.168.4.2"}}
/// {"type":"statusUpdate","ip":"192.168.4.2","status":{"mode":1,"servo":90,"distance":12.5,"ir":[1,0,1]}}
/// {"type":"otaResponse","ip":"192.168.4.2","code":0,"offset":1400,"status":null}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    DeviceDiscovered {
        device: DeviceInfo,
    },

    DeviceLost {
        ip: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mac: Option<String>,
    },

    StatusUpdate {
        ip: String,
        status: StatusPayload,
    },

    /// Every OTA acknowledgment, forwarded as received.  `status` is `null`
    /// for short acknowledgments.
    OtaResponse {
        ip: String,
        code: u8,
        offset: u32,
        status: Option<OtaStatusPayload>,
    },

    /// Progress of an engine-driven transfer.
    OtaProgress {
        ip: String,
        phase: String,
        percent: u8,
        #[serde(rename = "chunkSize")]
        chunk_size: usize,
    },

    /// Terminal state of an engine-driven transfer.
    OtaFinished {
        ip: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    WifiConfigResponse {
        ip: String,
        /// `"set"`, `"connect"` or `"get"`.
        op: String,
        code: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connected: Option<bool>,
    },

    /// A client request could not be carried out.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip: Option<String>,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
