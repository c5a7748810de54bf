//! Binary codec for rover UDP frames.
//!
//! Two frame families share one checksum rule: the last byte is the 8-bit
//! truncated sum of every byte before it.
//!
//! Fixed control frame (data length depends on the [`ProtocolRevision`]):
//! ```text
//! [type:1][cmd:1][data:3|4][checksum:1]
//! ```
//!
//! Length-prefixed frame (OTA, WiFi provisioning, MAC-tagged presence):
//! ```text
//! [type:1][cmd:1][offset:4][length:2][payload:length][checksum:1]
//! ```
//! All multi-byte integers are big-endian.

use thiserror::Error;

use crate::protocol::revision::ProtocolRevision;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Bytes before the payload of a length-prefixed frame.
pub const FRAMED_HEADER_LEN: usize = 8;

/// Smallest valid length-prefixed frame (empty payload).
pub const FRAMED_MIN_LEN: usize = FRAMED_HEADER_LEN + 1;

/// Largest payload a length-prefixed frame can declare.
pub const MAX_FRAMED_PAYLOAD: usize = u16::MAX as usize;

// ── Frame type codes ──────────────────────────────────────────────────────────

/// Leading byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    // Client → device control
    Control = 0x01,
    Status = 0x02,
    ModeChange = 0x03,
    SetParam = 0x04,
    // OTA (0x10–0x14)
    OtaStart = 0x10,
    OtaData = 0x11,
    OtaEnd = 0x12,
    OtaQuery = 0x13,
    OtaAck = 0x14,
    // WiFi provisioning, requests and acknowledgments share the code
    WifiSet = 0xE0,
    WifiConnect = 0xE1,
    WifiGet = 0xE2,
    // Presence
    Heartbeat = 0xFE,
    Presence = 0xFF,
}

impl FrameType {
    pub fn is_ota(self) -> bool {
        matches!(
            self,
            FrameType::OtaStart
                | FrameType::OtaData
                | FrameType::OtaEnd
                | FrameType::OtaQuery
                | FrameType::OtaAck
        )
    }

    pub fn is_wifi(self) -> bool {
        matches!(
            self,
            FrameType::WifiSet | FrameType::WifiConnect | FrameType::WifiGet
        )
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(FrameType::Control),
            0x02 => Ok(FrameType::Status),
            0x03 => Ok(FrameType::ModeChange),
            0x04 => Ok(FrameType::SetParam),
            0x10 => Ok(FrameType::OtaStart),
            0x11 => Ok(FrameType::OtaData),
            0x12 => Ok(FrameType::OtaEnd),
            0x13 => Ok(FrameType::OtaQuery),
            0x14 => Ok(FrameType::OtaAck),
            0xE0 => Ok(FrameType::WifiSet),
            0xE1 => Ok(FrameType::WifiConnect),
            0xE2 => Ok(FrameType::WifiGet),
            0xFE => Ok(FrameType::Heartbeat),
            0xFF => Ok(FrameType::Presence),
            _ => Err(()),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can occur while encoding or decoding a frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum frame size.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The trailing checksum byte does not match the sum of the frame.
    #[error("checksum mismatch: computed 0x{expected:02X}, frame carries 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// A length-prefixed frame's declared length disagrees with its size.
    #[error("length mismatch: header declares {declared} payload bytes, frame holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// A control frame was given the wrong number of data bytes.
    #[error("control frame needs {expected} data bytes, got {actual}")]
    DataLengthMismatch { expected: usize, actual: usize },

    /// Payload does not fit in the 16-bit length field.
    #[error("payload of {0} bytes exceeds the 65535-byte frame limit")]
    PayloadTooLarge(usize),

    /// The leading type byte is not a recognized value.
    #[error("unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// The frame type exists but not in the configured revision.
    #[error("frame type {frame_type:?} is not part of protocol {revision}")]
    Unsupported {
        frame_type: FrameType,
        revision: ProtocolRevision,
    },

    /// A known frame arrived from the wrong side of the link.
    #[error("frame type {0:?} is never sent by a device")]
    UnexpectedFrame(FrameType),

    /// The payload could not be parsed (field out of range, bad UTF-8, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Checksum ──────────────────────────────────────────────────────────────────

/// 8-bit truncated sum of `bytes`.
///
/// # Examples
///
/// ```rust
/// use rover_core::checksum8;
///
/// assert_eq!(checksum8(&[0x01, 0x02, 0x03]), 0x06);
/// assert_eq!(checksum8(&[0xFF, 0x02]), 0x01);
/// ```
pub fn checksum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

// ── Fixed control frames ──────────────────────────────────────────────────────

/// A decoded fixed control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub frame_type: u8,
    pub cmd: u8,
    /// Exactly `revision.control_data_len()` bytes.
    pub data: Vec<u8>,
}

/// Encodes a fixed control frame for `revision`.
///
/// # Errors
///
/// Returns [`ProtocolError::DataLengthMismatch`] if `data` does not hold
/// exactly the revision's number of data bytes.
///
/// # Examples
///
/// ```rust
/// use rover_core::{decode_control, encode_control, ProtocolRevision};
///
/// let rev = ProtocolRevision::V2;
/// let bytes = encode_control(rev, 0x01, 0x00, &[10, 20, 90, 0]).unwrap();
/// assert_eq!(bytes.len(), 7);
/// let frame = decode_control(rev, &bytes).unwrap();
/// assert_eq!(frame.data, vec![10, 20, 90, 0]);
/// ```
pub fn encode_control(
    revision: ProtocolRevision,
    frame_type: u8,
    cmd: u8,
    data: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let expected = revision.control_data_len();
    if data.len() != expected {
        return Err(ProtocolError::DataLengthMismatch {
            expected,
            actual: data.len(),
        });
    }

    let mut buf = Vec::with_capacity(revision.control_frame_len());
    buf.push(frame_type);
    buf.push(cmd);
    buf.extend_from_slice(data);
    buf.push(checksum8(&buf));
    Ok(buf)
}

/// Decodes a fixed control frame from the start of `bytes`.
///
/// Bytes past the revision's frame length are ignored; some firmware builds
/// pad their datagrams.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] for short input and
/// [`ProtocolError::ChecksumMismatch`] when the checksum does not match.
pub fn decode_control(revision: ProtocolRevision, bytes: &[u8]) -> Result<ControlFrame, ProtocolError> {
    let frame_len = revision.control_frame_len();
    if bytes.len() < frame_len {
        return Err(ProtocolError::InsufficientData {
            needed: frame_len,
            available: bytes.len(),
        });
    }

    let span = revision.checksum_span();
    verify_checksum(&bytes[..span], bytes[span])?;

    Ok(ControlFrame {
        frame_type: bytes[0],
        cmd: bytes[1],
        data: bytes[2..span].to_vec(),
    })
}

// ── Length-prefixed frames ────────────────────────────────────────────────────

/// A decoded length-prefixed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedPacket {
    pub frame_type: u8,
    pub cmd: u8,
    pub offset: u32,
    pub payload: Vec<u8>,
}

impl FramedPacket {
    /// Value of the frame's length field.
    pub fn length(&self) -> usize {
        self.payload.len()
    }
}

/// Encodes a length-prefixed frame.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if `payload` exceeds
/// [`MAX_FRAMED_PAYLOAD`].
pub fn encode_framed(
    frame_type: u8,
    cmd: u8,
    offset: u32,
    payload: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAMED_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(FRAMED_MIN_LEN + payload.len());
    buf.push(frame_type);
    buf.push(cmd);
    buf.extend_from_slice(&offset.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    buf.push(checksum8(&buf));
    Ok(buf)
}

/// Decodes a length-prefixed frame that must span all of `bytes`.
///
/// # Errors
///
/// Rejects short input, a checksum mismatch, and any frame whose declared
/// length plus header and checksum is not exactly `bytes.len()`.
pub fn decode_framed(bytes: &[u8]) -> Result<FramedPacket, ProtocolError> {
    if bytes.len() < FRAMED_MIN_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: FRAMED_MIN_LEN,
            available: bytes.len(),
        });
    }

    let last = bytes.len() - 1;
    verify_checksum(&bytes[..last], bytes[last])?;

    let declared = read_u16(bytes, 6)? as usize;
    let actual = bytes.len() - FRAMED_MIN_LEN;
    if declared != actual {
        return Err(ProtocolError::LengthMismatch { declared, actual });
    }

    Ok(FramedPacket {
        frame_type: bytes[0],
        cmd: bytes[1],
        offset: read_u32(bytes, 2)?,
        payload: bytes[FRAMED_HEADER_LEN..last].to_vec(),
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn verify_checksum(covered: &[u8], carried: u8) -> Result<(), ProtocolError> {
    let expected = checksum8(covered);
    if expected == carried {
        Ok(())
    } else {
        Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: carried,
        })
    }
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 2,
            available: buf.len(),
        });
    }
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    if buf.len() < offset + 4 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        });
    }
    Ok(u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}
