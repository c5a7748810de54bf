//! Classification of datagrams received from devices.
//!
//! The leading byte selects the handler; the configured
//! [`ProtocolRevision`] selects the layout.  Anything that does not decode
//! cleanly is an error the caller drops without answering.

use crate::domain::device::{DeviceMode, DeviceStatus};
use crate::protocol::codec::{
    checksum8, decode_control, decode_framed, ControlFrame, FrameType, ProtocolError,
};
use crate::protocol::payloads::{MacAddr, OtaAck, WifiAck};
use crate::protocol::revision::ProtocolRevision;

/// A decoded device→gateway datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Presence broadcast (0xFF).
    Presence { mac: Option<MacAddr> },
    /// Periodic keep-alive (0xFE).
    Heartbeat { mac: Option<MacAddr> },
    /// Sensor report (0x02).
    Status(DeviceStatus),
    /// OTA acknowledgment (0x14).
    OtaAck(OtaAck),
    /// WiFi provisioning acknowledgment (0xE0–0xE2).
    WifiAck(WifiAck),
}

impl InboundFrame {
    /// Hardware address carried by the frame, if any.
    pub fn mac(&self) -> Option<MacAddr> {
        match self {
            InboundFrame::Presence { mac } | InboundFrame::Heartbeat { mac } => *mac,
            _ => None,
        }
    }
}

/// Decodes one datagram received from a device.
///
/// # Errors
///
/// Returns [`ProtocolError`] for empty or corrupt datagrams, unknown type
/// bytes, frame types the revision does not define and client→device frame
/// types.
///
/// # Examples
///
/// ```rust
/// use rover_core::protocol::{outbound, parse_datagram, InboundFrame, ProtocolRevision};
///
/// let rev = ProtocolRevision::V2;
/// let bytes = outbound::presence(rev, None).unwrap();
/// assert_eq!(parse_datagram(rev, &bytes).unwrap(), InboundFrame::Presence { mac: None });
/// ```
pub fn parse_datagram(revision: ProtocolRevision, bytes: &[u8]) -> Result<InboundFrame, ProtocolError> {
    let Some(&type_byte) = bytes.first() else {
        return Err(ProtocolError::InsufficientData {
            needed: 1,
            available: 0,
        });
    };
    let frame_type =
        FrameType::try_from(type_byte).map_err(|_| ProtocolError::UnknownFrameType(type_byte))?;
    if !revision.supports(frame_type) {
        return Err(ProtocolError::Unsupported {
            frame_type,
            revision,
        });
    }

    match frame_type {
        FrameType::OtaAck => {
            let packet = decode_framed(bytes)?;
            Ok(InboundFrame::OtaAck(OtaAck::from_packet(&packet)))
        }
        FrameType::WifiSet | FrameType::WifiConnect | FrameType::WifiGet => {
            let packet = decode_framed(bytes)?;
            Ok(InboundFrame::WifiAck(WifiAck::from_packet(&packet)?))
        }
        FrameType::Presence => {
            let mac = parse_liveness(revision, bytes)?;
            Ok(InboundFrame::Presence { mac })
        }
        FrameType::Heartbeat => {
            let mac = parse_liveness(revision, bytes)?;
            Ok(InboundFrame::Heartbeat { mac })
        }
        FrameType::Status => {
            let frame = decode_control(revision, bytes)?;
            Ok(InboundFrame::Status(decode_status(&frame)?))
        }
        other => Err(ProtocolError::UnexpectedFrame(other)),
    }
}

/// Decodes the fields of a status control frame.
///
/// `cmd` is the mode, `data[0]` the servo angle, `data[1]` the distance ×10
/// and the last data byte the infrared bits.
pub fn decode_status(frame: &ControlFrame) -> Result<DeviceStatus, ProtocolError> {
    let mode = DeviceMode::try_from(frame.cmd)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
    let (Some(&servo), Some(&distance), Some(&ir)) =
        (frame.data.first(), frame.data.get(1), frame.data.last())
    else {
        return Err(ProtocolError::MalformedPayload(format!(
            "status frame needs at least 3 data bytes, got {}",
            frame.data.len()
        )));
    };
    Ok(DeviceStatus {
        mode,
        servo,
        distance: f32::from(distance) / 10.0,
        ir: DeviceStatus::ir_from_bits(ir),
    })
}

/// Presence and heartbeat frames: MAC-tagged length-prefixed frames on
/// revisions that support them, otherwise the plain fixed layout.
fn parse_liveness(revision: ProtocolRevision, bytes: &[u8]) -> Result<Option<MacAddr>, ProtocolError> {
    if revision.mac_identity() {
        if let Ok(packet) = decode_framed(bytes) {
            if packet.payload.len() >= MacAddr::LEN {
                return Ok(Some(MacAddr::from_slice(&packet.payload)?));
            }
        }
    }

    if bytes[0] == FrameType::Heartbeat as u8 && revision.heartbeat_len() == 2 {
        if bytes.len() < 2 {
            return Err(ProtocolError::InsufficientData {
                needed: 2,
                available: bytes.len(),
            });
        }
        let expected = checksum8(&bytes[..1]);
        if expected != bytes[1] {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: bytes[1],
            });
        }
        return Ok(None);
    }

    decode_control(revision, bytes)?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{encode_control, encode_framed};
    use crate::protocol::payloads::OtaDeviceStatus;

    #[test]
    fn test_empty_datagram_is_rejected() {
        assert!(matches!(
            parse_datagram(ProtocolRevision::V2, &[]),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_unknown_type_byte_is_rejected() {
        let bytes = encode_control(ProtocolRevision::V2, 0x55, 0, &[0, 0, 0, 0]).unwrap();
        assert_eq!(
            parse_datagram(ProtocolRevision::V2, &bytes),
            Err(ProtocolError::UnknownFrameType(0x55))
        );
    }

    #[test]
    fn test_client_frame_type_from_device_is_rejected() {
        let bytes = encode_control(ProtocolRevision::V2, 0x01, 0, &[0, 0, 90, 0]).unwrap();
        assert_eq!(
            parse_datagram(ProtocolRevision::V2, &bytes),
            Err(ProtocolError::UnexpectedFrame(FrameType::Control))
        );
    }

    #[test]
    fn test_status_frame_v2_decodes_fields() {
        // Arrange: mode tracking, servo 85, distance 12.5, ir = left + right
        let bytes = encode_control(ProtocolRevision::V2, 0x02, 1, &[85, 125, 0, 0b101]).unwrap();

        // Act
        let frame = parse_datagram(ProtocolRevision::V2, &bytes).unwrap();

        // Assert
        assert_eq!(
            frame,
            InboundFrame::Status(DeviceStatus {
                mode: DeviceMode::Tracking,
                servo: 85,
                distance: 12.5,
                ir: [1, 0, 1],
            })
        );
    }

    #[test]
    fn test_status_frame_v1_takes_ir_from_third_data_byte() {
        let bytes = encode_control(ProtocolRevision::V1, 0x02, 2, &[90, 40, 0b010]).unwrap();

        let InboundFrame::Status(status) = parse_datagram(ProtocolRevision::V1, &bytes).unwrap()
        else {
            panic!("expected a status frame");
        };

        assert_eq!(status.mode, DeviceMode::Avoid);
        assert_eq!(status.distance, 4.0);
        assert_eq!(status.ir, [0, 1, 0]);
    }

    #[test]
    fn test_status_frame_with_unknown_mode_is_malformed() {
        let bytes = encode_control(ProtocolRevision::V2, 0x02, 7, &[0, 0, 0, 0]).unwrap();
        assert!(matches!(
            parse_datagram(ProtocolRevision::V2, &bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_v1_heartbeat_is_two_bytes() {
        let frame = parse_datagram(ProtocolRevision::V1, &[0xFE, 0xFE]).unwrap();
        assert_eq!(frame, InboundFrame::Heartbeat { mac: None });
    }

    #[test]
    fn test_v1_heartbeat_with_bad_checksum_is_rejected() {
        assert!(parse_datagram(ProtocolRevision::V1, &[0xFE, 0x00]).is_err());
    }

    #[test]
    fn test_v2_heartbeat_requires_full_control_frame() {
        assert!(parse_datagram(ProtocolRevision::V2, &[0xFE, 0xFE]).is_err());
        let bytes = encode_control(ProtocolRevision::V2, 0xFE, 0, &[0, 0, 0, 0]).unwrap();
        assert_eq!(
            parse_datagram(ProtocolRevision::V2, &bytes).unwrap(),
            InboundFrame::Heartbeat { mac: None }
        );
    }

    #[test]
    fn test_v3_presence_carries_mac() {
        let mac = [0x24, 0x0A, 0xC4, 0x11, 0x22, 0x33];
        let bytes = encode_framed(0xFF, 0, 0, &mac).unwrap();

        let frame = parse_datagram(ProtocolRevision::V3, &bytes).unwrap();

        assert_eq!(frame.mac(), Some(MacAddr(mac)));
        assert!(matches!(frame, InboundFrame::Presence { .. }));
    }

    #[test]
    fn test_v3_plain_presence_falls_back_to_control_layout() {
        let bytes = encode_control(ProtocolRevision::V3, 0xFF, 0, &[0, 0, 0, 0]).unwrap();
        assert_eq!(
            parse_datagram(ProtocolRevision::V3, &bytes).unwrap(),
            InboundFrame::Presence { mac: None }
        );
    }

    #[test]
    fn test_ota_ack_with_status_block() {
        let status = OtaDeviceStatus {
            ota_status: 2,
            progress: 46,
            received: 1400,
            total: 3000,
        };
        let bytes = encode_framed(0x14, 0, 1400, &status.encode()).unwrap();

        let frame = parse_datagram(ProtocolRevision::V2, &bytes).unwrap();

        assert_eq!(
            frame,
            InboundFrame::OtaAck(OtaAck {
                code: 0,
                offset: 1400,
                status: Some(status),
            })
        );
    }

    #[test]
    fn test_ota_ack_is_unsupported_on_v1() {
        let bytes = encode_framed(0x14, 0, 0, &[]).unwrap();
        assert!(matches!(
            parse_datagram(ProtocolRevision::V1, &bytes),
            Err(ProtocolError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_wifi_ack_only_on_v3() {
        let bytes = encode_framed(0xE1, 0, 0, &[]).unwrap();
        assert!(parse_datagram(ProtocolRevision::V2, &bytes).is_err());
        assert!(matches!(
            parse_datagram(ProtocolRevision::V3, &bytes).unwrap(),
            InboundFrame::WifiAck(_)
        ));
    }
}
