//! Typed payloads carried inside length-prefixed frames.

use std::fmt;
use std::str::FromStr;

use crate::protocol::codec::{read_u32, FrameType, FramedPacket, ProtocolError};

// ── MAC address ───────────────────────────────────────────────────────────────

/// 48-bit hardware address reported by MAC-tagged presence frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const LEN: usize = 6;

    /// Reads a MAC from the first six bytes of `buf`.
    pub fn from_slice(buf: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; 6] = buf
            .get(..Self::LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                ProtocolError::MalformedPayload(format!(
                    "MAC address needs 6 bytes, got {}",
                    buf.len()
                ))
            })?;
        Ok(MacAddr(bytes))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = ProtocolError;

    /// Parses `aa:bb:cc:dd:ee:ff` (case-insensitive, `-` also accepted).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProtocolError::MalformedPayload(format!("invalid MAC address '{s}'"));
        let mut out = [0u8; 6];
        let mut parts = s.split(|c: char| c == ':' || c == '-');
        for slot in out.iter_mut() {
            let part = parts.next().ok_or_else(malformed)?;
            if part.len() != 2 {
                return Err(malformed());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| malformed())?;
        }
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(MacAddr(out))
    }
}

// ── OTA acknowledgment ────────────────────────────────────────────────────────

/// Result codes carried in the `cmd` byte of an OTA acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaResultCode {
    Ok = 0,
    /// Request not valid in the device's current OTA state.
    WrongState = 1,
    /// Offset, size or payload rejected.
    BadParameter = 2,
    /// Flash or partition failure on the device.
    Internal = 3,
}

impl TryFrom<u8> for OtaResultCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(OtaResultCode::Ok),
            1 => Ok(OtaResultCode::WrongState),
            2 => Ok(OtaResultCode::BadParameter),
            3 => Ok(OtaResultCode::Internal),
            _ => Err(()),
        }
    }
}

/// Device-side OTA state reported in the first byte of the status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaDeviceState {
    Idle = 0,
    /// Start accepted, update partition prepared, no data written yet.
    Prepared = 1,
    Receiving = 2,
    Upgrading = 3,
    Done = 4,
    Error = 5,
}

impl TryFrom<u8> for OtaDeviceState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(OtaDeviceState::Idle),
            1 => Ok(OtaDeviceState::Prepared),
            2 => Ok(OtaDeviceState::Receiving),
            3 => Ok(OtaDeviceState::Upgrading),
            4 => Ok(OtaDeviceState::Done),
            5 => Ok(OtaDeviceState::Error),
            _ => Err(()),
        }
    }
}

/// Optional 10-byte status block appended to an OTA acknowledgment.
///
/// ```text
/// [status:1][progress:1][received:4][total:4]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaDeviceStatus {
    pub ota_status: u8,
    /// Device-computed progress, 0–100.
    pub progress: u8,
    pub received: u32,
    pub total: u32,
}

impl OtaDeviceStatus {
    pub const LEN: usize = 10;

    /// Decodes the status block, or `None` when the payload is too short to hold one.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::LEN {
            return None;
        }
        Some(Self {
            ota_status: payload[0],
            progress: payload[1],
            received: read_u32(payload, 2).ok()?,
            total: read_u32(payload, 6).ok()?,
        })
    }

    pub fn state(&self) -> Option<OtaDeviceState> {
        OtaDeviceState::try_from(self.ota_status).ok()
    }

    pub fn encode(&self) -> [u8; 10] {
        let mut buf = [0u8; 10];
        buf[0] = self.ota_status;
        buf[1] = self.progress;
        buf[2..6].copy_from_slice(&self.received.to_be_bytes());
        buf[6..10].copy_from_slice(&self.total.to_be_bytes());
        buf
    }
}

/// A device's answer to an OTA start, data, end or query frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaAck {
    /// Raw result code; 0 means success.
    pub code: u8,
    /// Offset the device acknowledges (0 for start and end).
    pub offset: u32,
    pub status: Option<OtaDeviceStatus>,
}

impl OtaAck {
    pub fn from_packet(packet: &FramedPacket) -> Self {
        Self {
            code: packet.cmd,
            offset: packet.offset,
            status: OtaDeviceStatus::decode(&packet.payload),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == OtaResultCode::Ok as u8
    }

    pub fn result(&self) -> Option<OtaResultCode> {
        OtaResultCode::try_from(self.code).ok()
    }
}

// ── WiFi provisioning ─────────────────────────────────────────────────────────

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;

/// WiFi provisioning operation, identified by the frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiOp {
    Set,
    Connect,
    Get,
}

impl WifiOp {
    pub fn frame_type(self) -> FrameType {
        match self {
            WifiOp::Set => FrameType::WifiSet,
            WifiOp::Connect => FrameType::WifiConnect,
            WifiOp::Get => FrameType::WifiGet,
        }
    }

    pub fn from_frame_type(byte: u8) -> Option<Self> {
        match FrameType::try_from(byte) {
            Ok(FrameType::WifiSet) => Some(WifiOp::Set),
            Ok(FrameType::WifiConnect) => Some(WifiOp::Connect),
            Ok(FrameType::WifiGet) => Some(WifiOp::Get),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WifiOp::Set => "set",
            WifiOp::Connect => "connect",
            WifiOp::Get => "get",
        }
    }
}

/// Credentials sent in a WiFi `set` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    /// Validates lengths: SSID 1–32 bytes, password 0–64 bytes.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ProtocolError> {
        let ssid = ssid.into();
        let password = password.into();
        if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
            return Err(ProtocolError::MalformedPayload(format!(
                "SSID must be 1-{MAX_SSID_LEN} bytes, got {}",
                ssid.len()
            )));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(ProtocolError::MalformedPayload(format!(
                "password must be at most {MAX_PASSWORD_LEN} bytes, got {}",
                password.len()
            )));
        }
        Ok(Self { ssid, password })
    }

    /// `[ssid_len:1][ssid][pwd_len:1][pwd]`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.ssid.len() + self.password.len());
        buf.push(self.ssid.len() as u8);
        buf.extend_from_slice(self.ssid.as_bytes());
        buf.push(self.password.len() as u8);
        buf.extend_from_slice(self.password.as_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (ssid, rest) = read_short_string(payload, "ssid")?;
        let (password, _) = read_short_string(rest, "password")?;
        Self::new(ssid, password)
    }
}

/// A device's answer to a WiFi provisioning frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiAck {
    pub op: WifiOp,
    pub code: u8,
    /// Only present on `get` acknowledgments that carry a status block.
    pub connected: Option<bool>,
    pub ssid: Option<String>,
}

impl WifiAck {
    pub fn from_packet(packet: &FramedPacket) -> Result<Self, ProtocolError> {
        let op = WifiOp::from_frame_type(packet.frame_type)
            .ok_or(ProtocolError::UnknownFrameType(packet.frame_type))?;

        let (connected, ssid) = if op == WifiOp::Get && !packet.payload.is_empty() {
            let connected = packet.payload[0] != 0;
            let ssid = if packet.payload.len() > 1 {
                let (ssid, _) = read_short_string(&packet.payload[1..], "ssid")?;
                Some(ssid)
            } else {
                None
            };
            (Some(connected), ssid)
        } else {
            (None, None)
        };

        Ok(Self {
            op,
            code: packet.cmd,
            connected,
            ssid,
        })
    }

    /// Payload for the acknowledgment frame, empty unless `connected` is set.
    pub fn encode_payload(&self) -> Vec<u8> {
        let Some(connected) = self.connected else {
            return Vec::new();
        };
        let ssid = self.ssid.as_deref().unwrap_or("").as_bytes();
        let ssid = &ssid[..ssid.len().min(MAX_SSID_LEN)];
        let mut buf = Vec::with_capacity(2 + ssid.len());
        buf.push(u8::from(connected));
        buf.push(ssid.len() as u8);
        buf.extend_from_slice(ssid);
        buf
    }
}

fn read_short_string<'a>(buf: &'a [u8], field: &str) -> Result<(String, &'a [u8]), ProtocolError> {
    let (&len, rest) = buf
        .split_first()
        .ok_or_else(|| ProtocolError::MalformedPayload(format!("missing {field} length")))?;
    let len = len as usize;
    if rest.len() < len {
        return Err(ProtocolError::MalformedPayload(format!(
            "{field}: declared {len} bytes, only {} available",
            rest.len()
        )));
    }
    let value = std::str::from_utf8(&rest[..len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("{field} is not UTF-8: {e}")))?
        .to_string();
    Ok((value, &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_display_is_lowercase_colon_separated() {
        let mac = MacAddr([0xAA, 0x0B, 0xCC, 0x01, 0x02, 0xFF]);
        assert_eq!(mac.to_string(), "aa:0b:cc:01:02:ff");
    }

    #[test]
    fn test_mac_parse_accepts_display_output() {
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        assert_eq!(mac.to_string().parse::<MacAddr>(), Ok(mac));
        assert_eq!("01-02-03-04-05-06".parse::<MacAddr>(), Ok(mac));
    }

    #[test]
    fn test_mac_parse_rejects_wrong_group_count() {
        assert!("01:02:03:04:05".parse::<MacAddr>().is_err());
        assert!("01:02:03:04:05:06:07".parse::<MacAddr>().is_err());
        assert!("zz:02:03:04:05:06".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_from_short_slice_is_rejected() {
        assert!(MacAddr::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_ota_status_decodes_only_with_ten_bytes() {
        let status = OtaDeviceStatus {
            ota_status: 2,
            progress: 47,
            received: 1400,
            total: 3000,
        };
        let bytes = status.encode();

        assert_eq!(OtaDeviceStatus::decode(&bytes), Some(status));
        assert_eq!(OtaDeviceStatus::decode(&bytes[..9]), None);
        assert_eq!(status.state(), Some(OtaDeviceState::Receiving));
    }

    #[test]
    fn test_unknown_ota_device_state_is_none() {
        let status = OtaDeviceStatus {
            ota_status: 9,
            progress: 0,
            received: 0,
            total: 0,
        };

        assert_eq!(status.state(), None);
    }

    #[test]
    fn test_ota_ack_from_packet_without_status() {
        let packet = FramedPacket {
            frame_type: 0x14,
            cmd: 2,
            offset: 1400,
            payload: vec![],
        };

        let ack = OtaAck::from_packet(&packet);

        assert_eq!(ack.code, 2);
        assert_eq!(ack.offset, 1400);
        assert_eq!(ack.status, None);
        assert!(!ack.is_ok());
        assert_eq!(ack.result(), Some(OtaResultCode::BadParameter));
    }

    #[test]
    fn test_wifi_credentials_length_limits() {
        assert!(WifiCredentials::new("", "pw").is_err());
        assert!(WifiCredentials::new("a".repeat(33), "").is_err());
        assert!(WifiCredentials::new("home", "p".repeat(65)).is_err());
        assert!(WifiCredentials::new("a".repeat(32), "p".repeat(64)).is_ok());
    }

    #[test]
    fn test_wifi_credentials_payload_layout() {
        let creds = WifiCredentials::new("lab", "secret").unwrap();

        let payload = creds.encode();

        assert_eq!(payload[0], 3);
        assert_eq!(&payload[1..4], b"lab");
        assert_eq!(payload[4], 6);
        assert_eq!(&payload[5..], b"secret");
        assert_eq!(WifiCredentials::decode(&payload), Ok(creds));
    }

    #[test]
    fn test_wifi_get_ack_carries_connection_state() {
        let packet = FramedPacket {
            frame_type: 0xE2,
            cmd: 0,
            offset: 0,
            payload: vec![1, 4, b'h', b'o', b'm', b'e'],
        };

        let ack = WifiAck::from_packet(&packet).unwrap();

        assert_eq!(ack.op, WifiOp::Get);
        assert_eq!(ack.connected, Some(true));
        assert_eq!(ack.ssid.as_deref(), Some("home"));
        assert_eq!(ack.encode_payload(), packet.payload);
    }

    #[test]
    fn test_wifi_set_ack_has_no_status() {
        let packet = FramedPacket {
            frame_type: 0xE0,
            cmd: 1,
            offset: 0,
            payload: vec![],
        };

        let ack = WifiAck::from_packet(&packet).unwrap();

        assert_eq!(ack.op, WifiOp::Set);
        assert_eq!(ack.code, 1);
        assert_eq!(ack.connected, None);
    }

    #[test]
    fn test_wifi_ack_with_truncated_ssid_is_malformed() {
        let packet = FramedPacket {
            frame_type: 0xE2,
            cmd: 0,
            offset: 0,
            payload: vec![1, 10, b'x'],
        };
        assert!(matches!(
            WifiAck::from_packet(&packet),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }
}
