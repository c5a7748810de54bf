//! Frame builders.
//!
//! The first half builds the frames the gateway sends to devices.  The
//! second half builds device→gateway frames; the gateway never sends those,
//! but device simulators and tests do.

use crate::domain::device::{DeviceMode, DeviceStatus};
use crate::protocol::codec::{encode_control, encode_framed, FrameType, ProtocolError};
use crate::protocol::payloads::{MacAddr, OtaDeviceStatus, WifiAck, WifiCredentials};
use crate::protocol::revision::ProtocolRevision;

/// Pads `data` with zeros to the revision's control-frame data length.
fn control(
    revision: ProtocolRevision,
    frame_type: FrameType,
    cmd: u8,
    data: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let mut padded = vec![0u8; revision.control_data_len()];
    let n = data.len().min(padded.len());
    padded[..n].copy_from_slice(&data[..n]);
    encode_control(revision, frame_type as u8, cmd, &padded)
}

// ── Gateway → device ──────────────────────────────────────────────────────────

/// Motion control: two signed motor speeds and the steering servo angle.
pub fn motion(
    revision: ProtocolRevision,
    motor1: i8,
    motor2: i8,
    servo: u8,
) -> Result<Vec<u8>, ProtocolError> {
    control(
        revision,
        FrameType::Control,
        0x00,
        &[motor1 as u8, motor2 as u8, servo],
    )
}

pub fn mode_change(revision: ProtocolRevision, mode: DeviceMode) -> Result<Vec<u8>, ProtocolError> {
    control(revision, FrameType::ModeChange, mode as u8, &[])
}

/// Tuning parameter: `param` in `cmd`, `value` big-endian in the first two data bytes.
pub fn set_param(revision: ProtocolRevision, param: u8, value: u16) -> Result<Vec<u8>, ProtocolError> {
    control(revision, FrameType::SetParam, param, &value.to_be_bytes())
}

/// OTA start carrying the total image size.
pub fn ota_start(total: u32) -> Result<Vec<u8>, ProtocolError> {
    encode_framed(FrameType::OtaStart as u8, 0x00, 0, &total.to_be_bytes())
}

pub fn ota_data(offset: u32, chunk: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode_framed(FrameType::OtaData as u8, 0x00, offset, chunk)
}

pub fn ota_end() -> Result<Vec<u8>, ProtocolError> {
    encode_framed(FrameType::OtaEnd as u8, 0x00, 0, &[])
}

pub fn ota_query() -> Result<Vec<u8>, ProtocolError> {
    encode_framed(FrameType::OtaQuery as u8, 0x00, 0, &[])
}

pub fn wifi_set(credentials: &WifiCredentials) -> Result<Vec<u8>, ProtocolError> {
    encode_framed(FrameType::WifiSet as u8, 0x00, 0, &credentials.encode())
}

pub fn wifi_connect() -> Result<Vec<u8>, ProtocolError> {
    encode_framed(FrameType::WifiConnect as u8, 0x00, 0, &[])
}

pub fn wifi_get() -> Result<Vec<u8>, ProtocolError> {
    encode_framed(FrameType::WifiGet as u8, 0x00, 0, &[])
}

// ── Device → gateway ──────────────────────────────────────────────────────────

pub fn status(revision: ProtocolRevision, status: &DeviceStatus) -> Result<Vec<u8>, ProtocolError> {
    let mut data = vec![0u8; revision.control_data_len()];
    data[0] = status.servo;
    data[1] = status.distance_wire();
    let last = data.len() - 1;
    data[last] = status.ir_bits();
    encode_control(revision, FrameType::Status as u8, status.mode as u8, &data)
}

/// Presence broadcast, MAC-tagged when a MAC is given on a revision that supports it.
pub fn presence(revision: ProtocolRevision, mac: Option<MacAddr>) -> Result<Vec<u8>, ProtocolError> {
    match mac {
        Some(mac) if revision.mac_identity() => {
            encode_framed(FrameType::Presence as u8, 0x00, 0, &mac.octets())
        }
        _ => control(revision, FrameType::Presence, 0x00, &[]),
    }
}

pub fn heartbeat(revision: ProtocolRevision, mac: Option<MacAddr>) -> Result<Vec<u8>, ProtocolError> {
    match mac {
        Some(mac) if revision.mac_identity() => {
            encode_framed(FrameType::Heartbeat as u8, 0x00, 0, &mac.octets())
        }
        _ if revision.heartbeat_len() == 2 => {
            let t = FrameType::Heartbeat as u8;
            Ok(vec![t, t])
        }
        _ => control(revision, FrameType::Heartbeat, 0x00, &[]),
    }
}

pub fn ota_ack(code: u8, offset: u32, status: Option<&OtaDeviceStatus>) -> Result<Vec<u8>, ProtocolError> {
    let payload = status.map(|s| s.encode().to_vec()).unwrap_or_default();
    encode_framed(FrameType::OtaAck as u8, code, offset, &payload)
}

pub fn wifi_ack(ack: &WifiAck) -> Result<Vec<u8>, ProtocolError> {
    encode_framed(ack.op.frame_type() as u8, ack.code, 0, &ack.encode_payload())
}
