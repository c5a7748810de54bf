//! Device identity, operating modes and decoded status.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol::payloads::MacAddr;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Key of a device in the registry.
///
/// MAC-tagged revisions key devices by hardware address so a DHCP lease
/// change does not look like a new device; otherwise the IP is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceId {
    Mac(MacAddr),
    Ip(IpAddr),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Mac(mac) => write!(f, "{mac}"),
            DeviceId::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

// ── Modes ─────────────────────────────────────────────────────────────────────

/// Operating mode of the rover, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceMode {
    Standby = 0,
    /// Line tracking.
    Tracking = 1,
    /// Obstacle avoidance.
    Avoid = 2,
    /// Driven by control frames from a client.
    Remote = 3,
}

/// Returned when a mode number or name is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown device mode '{0}'")]
pub struct UnknownMode(pub String);

impl DeviceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceMode::Standby => "standby",
            DeviceMode::Tracking => "tracking",
            DeviceMode::Avoid => "avoid",
            DeviceMode::Remote => "remote",
        }
    }
}

impl TryFrom<u8> for DeviceMode {
    type Error = UnknownMode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeviceMode::Standby),
            1 => Ok(DeviceMode::Tracking),
            2 => Ok(DeviceMode::Avoid),
            3 => Ok(DeviceMode::Remote),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl FromStr for DeviceMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standby" => Ok(DeviceMode::Standby),
            "tracking" => Ok(DeviceMode::Tracking),
            "avoid" => Ok(DeviceMode::Avoid),
            "remote" => Ok(DeviceMode::Remote),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Last sensor snapshot reported by a device in a status frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub mode: DeviceMode,
    /// Steering servo angle in degrees.
    pub servo: u8,
    /// Ultrasonic distance, one decimal place (wire value ÷ 10).
    pub distance: f32,
    /// Infrared line sensors `[left, middle, right]`, each 0 or 1.
    pub ir: [u8; 3],
}

impl DeviceStatus {
    pub fn ir_from_bits(bits: u8) -> [u8; 3] {
        [bits & 1, (bits >> 1) & 1, (bits >> 2) & 1]
    }

    pub fn ir_bits(&self) -> u8 {
        (self.ir[0] & 1) | ((self.ir[1] & 1) << 1) | ((self.ir[2] & 1) << 2)
    }

    /// Distance as sent on the wire, saturating at 25.5.
    pub fn distance_wire(&self) -> u8 {
        (self.distance * 10.0).round().clamp(0.0, 255.0) as u8
    }
}
