//! Firmware protocol revisions.
//!
//! Rover firmware has shipped with several incompatible frame layouts.  They
//! differ in the number of data bytes in a control frame (and therefore the
//! checksum span), the heartbeat length, the opcodes they understand and
//! whether a device identifies itself by MAC address.  The gateway is told
//! which revision it talks to; it never guesses from a datagram.
//!
//! | Revision | Control frame          | Heartbeat        | OTA | WiFi | Identity |
//! |----------|------------------------|------------------|-----|------|----------|
//! | `v1`     | `type,cmd,d0..d2,chk`  | `FE,chk`         | no  | no   | IP       |
//! | `v2`     | `type,cmd,d0..d3,chk`  | 7-byte control   | yes | no   | IP       |
//! | `v3`     | as `v2`                | control or MAC   | yes | yes  | MAC      |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::codec::FrameType;

/// Protocol revision spoken by the devices on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolRevision {
    /// Original firmware: 3 data bytes, 2-byte heartbeat, no OTA.
    V1,
    /// 4 data bytes, 7-byte heartbeat, OTA over length-prefixed frames.
    #[default]
    V2,
    /// As `V2`, plus WiFi provisioning and MAC-tagged presence frames.
    V3,
}

/// Returned when parsing a revision name fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown protocol revision '{0}' (expected v1, v2 or v3)")]
pub struct UnknownRevision(pub String);

impl ProtocolRevision {
    /// Number of data bytes between `cmd` and the checksum of a control frame.
    pub fn control_data_len(self) -> usize {
        match self {
            ProtocolRevision::V1 => 3,
            ProtocolRevision::V2 | ProtocolRevision::V3 => 4,
        }
    }

    /// Total length of a fixed control frame, checksum included.
    pub fn control_frame_len(self) -> usize {
        2 + self.control_data_len() + 1
    }

    /// Number of bytes covered by the control-frame checksum.
    pub fn checksum_span(self) -> usize {
        self.control_frame_len() - 1
    }

    /// Length of the plain (MAC-less) heartbeat frame.
    pub fn heartbeat_len(self) -> usize {
        match self {
            ProtocolRevision::V1 => 2,
            ProtocolRevision::V2 | ProtocolRevision::V3 => self.control_frame_len(),
        }
    }

    pub fn supports_ota(self) -> bool {
        !matches!(self, ProtocolRevision::V1)
    }

    pub fn supports_wifi_config(self) -> bool {
        matches!(self, ProtocolRevision::V3)
    }

    /// `true` when devices may tag presence and heartbeat frames with a MAC.
    pub fn mac_identity(self) -> bool {
        matches!(self, ProtocolRevision::V3)
    }

    /// Returns `true` if frames of `frame_type` exist in this revision.
    pub fn supports(self, frame_type: FrameType) -> bool {
        if frame_type.is_ota() {
            self.supports_ota()
        } else if frame_type.is_wifi() {
            self.supports_wifi_config()
        } else {
            true
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolRevision::V1 => "v1",
            ProtocolRevision::V2 => "v2",
            ProtocolRevision::V3 => "v3",
        }
    }
}

impl fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolRevision {
    type Err = UnknownRevision;

    /// Accepts `v1`/`V1`/`1` and likewise for the other revisions.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(ProtocolRevision::V1),
            "v2" | "2" => Ok(ProtocolRevision::V2),
            "v3" | "3" => Ok(ProtocolRevision::V3),
            _ => Err(UnknownRevision(s.to_string())),
        }
    }
}
