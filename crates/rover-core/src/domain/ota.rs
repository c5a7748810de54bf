//! OTA transfer engine.
//!
//! Delivers a firmware image to one device over UDP in strict lock-step:
//! exactly one frame is in flight, and the engine only moves on when the
//! matching acknowledgment arrives.
//!
//! ```text
//!  Idle ──begin──► Start ──ack──► Data ──ack (last chunk)──► End ──ack──► Idle (completed)
//!                    ▲              │
//!                    └── fallback ──┘   first chunk keeps timing out on the primary size
//! ```
//!
//! The session performs no I/O.  Every entry point returns a list of
//! [`OtaAction`]s for the caller to execute: datagrams to send, a timer to
//! arm or cancel, progress to report and finally the outcome.  Timers are
//! tagged with a generation number so a timer that fires after its frame was
//! acknowledged is recognised as stale and ignored.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::codec::{ProtocolError, MAX_FRAMED_PAYLOAD};
use crate::protocol::outbound;
use crate::protocol::payloads::{OtaAck, OtaDeviceState};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tunables of the transfer engine.
///
/// | Field                  | Default |
/// |------------------------|---------|
/// | `primary_chunk_size`   | 1400    |
/// | `fallback_chunk_size`  | 512     |
/// | `ack_timeout`          | 1500 ms |
/// | `max_retries`          | 5       |
/// | `fast_fail_retries`    | 2       |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaConfig {
    /// Data chunk size tried first.
    pub primary_chunk_size: usize,
    /// Smaller chunk size used after the first chunk fails on the primary size.
    pub fallback_chunk_size: usize,
    /// How long to wait for each acknowledgment.
    pub ack_timeout: Duration,
    /// Resends allowed per frame before the session fails.
    pub max_retries: u32,
    /// Timeouts on the first primary-size chunk before falling back.
    pub fast_fail_retries: u32,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            primary_chunk_size: 1400,
            fallback_chunk_size: 512,
            ack_timeout: Duration::from_millis(1500),
            max_retries: 5,
            fast_fail_retries: 2,
        }
    }
}

impl OtaConfig {
    /// Checks the invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<(), OtaError> {
        if self.fallback_chunk_size == 0 || self.primary_chunk_size == 0 {
            return Err(OtaError::InvalidConfig("chunk sizes must be non-zero".into()));
        }
        if self.primary_chunk_size > MAX_FRAMED_PAYLOAD {
            return Err(OtaError::InvalidConfig(format!(
                "primary chunk size {} exceeds the {MAX_FRAMED_PAYLOAD}-byte frame limit",
                self.primary_chunk_size
            )));
        }
        if self.fallback_chunk_size > self.primary_chunk_size {
            return Err(OtaError::InvalidConfig(format!(
                "fallback chunk size {} is larger than primary {}",
                self.fallback_chunk_size, self.primary_chunk_size
            )));
        }
        if self.ack_timeout.is_zero() {
            return Err(OtaError::InvalidConfig("ack timeout must be non-zero".into()));
        }
        if self.fast_fail_retries > self.max_retries {
            return Err(OtaError::InvalidConfig(format!(
                "fast-fail retries {} exceed the retry budget {}",
                self.fast_fail_retries, self.max_retries
            )));
        }
        Ok(())
    }
}

// ── Errors and outcomes ───────────────────────────────────────────────────────

/// Reasons a session cannot be created.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OtaError {
    #[error("firmware image is empty")]
    EmptyImage,

    #[error("firmware image of {0} bytes does not fit a 32-bit size field")]
    ImageTooLarge(usize),

    #[error("invalid OTA configuration: {0}")]
    InvalidConfig(String),
}

/// Protocol step of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Idle,
    Start,
    Data,
    End,
}

impl OtaPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            OtaPhase::Idle => "idle",
            OtaPhase::Start => "start",
            OtaPhase::Data => "data",
            OtaPhase::End => "end",
        }
    }
}

impl fmt::Display for OtaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended without completing.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OtaFailure {
    #[error("device rejected {phase} with code {code}")]
    DeviceRejected { phase: OtaPhase, code: u8 },

    #[error("no acknowledgment for {phase} at offset {offset} after retries")]
    RetriesExhausted { phase: OtaPhase, offset: u32 },

    #[error("transfer aborted")]
    Aborted,

    #[error("could not build frame: {0}")]
    Encoding(#[from] ProtocolError),
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum OtaOutcome {
    Completed,
    Failed(OtaFailure),
}

impl OtaOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OtaOutcome::Completed)
    }
}

/// Side effects requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum OtaAction {
    /// Send this datagram to the device.
    Send(Vec<u8>),
    /// (Re)arm the acknowledgment timer; replaces any earlier timer.
    ArmTimer { generation: u64, after: Duration },
    /// Drop the pending timer.
    CancelTimer,
    Progress {
        phase: OtaPhase,
        percent: u8,
        chunk_size: usize,
    },
    Finished(OtaOutcome),
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct InFlight {
    offset: usize,
    len: usize,
    frame: Vec<u8>,
}

/// One firmware transfer to one device.
#[derive(Debug)]
pub struct OtaSession {
    image: Vec<u8>,
    config: OtaConfig,
    phase: OtaPhase,
    offset: usize,
    chunk_size: usize,
    in_flight: Option<InFlight>,
    retries: u32,
    fallback_used: bool,
    generation: u64,
    outcome: Option<OtaOutcome>,
}

impl OtaSession {
    /// Creates an idle session for `image`.
    ///
    /// # Errors
    ///
    /// Refuses an empty image, an image whose size does not fit in `u32`, and
    /// an invalid `config`.
    pub fn new(image: Vec<u8>, config: OtaConfig) -> Result<Self, OtaError> {
        config.validate()?;
        if image.is_empty() {
            return Err(OtaError::EmptyImage);
        }
        if u32::try_from(image.len()).is_err() {
            return Err(OtaError::ImageTooLarge(image.len()));
        }
        let chunk_size = config.primary_chunk_size;
        Ok(Self {
            image,
            config,
            phase: OtaPhase::Idle,
            offset: 0,
            chunk_size,
            in_flight: None,
            retries: 0,
            fallback_used: false,
            generation: 0,
            outcome: None,
        })
    }

    pub fn phase(&self) -> OtaPhase {
        self.phase
    }

    /// Bytes acknowledged so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total(&self) -> usize {
        self.image.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Timeouts on the current frame.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fallback_used(&self) -> bool {
        self.fallback_used
    }

    pub fn outcome(&self) -> Option<&OtaOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// `true` while a frame is awaiting acknowledgment.
    pub fn is_active(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts the transfer by sending the start frame.
    ///
    /// Calling `begin` on a session that already started does nothing.
    pub fn begin(&mut self) -> Vec<OtaAction> {
        if self.phase != OtaPhase::Idle || self.is_finished() {
            return Vec::new();
        }
        info!(
            total = self.total(),
            chunk_size = self.chunk_size,
            "OTA transfer starting"
        );
        self.enter_start()
    }

    /// Feeds a device acknowledgment into the session.
    pub fn on_ack(&mut self, ack: &OtaAck) -> Vec<OtaAction> {
        let Some(in_flight) = self.in_flight.as_ref() else {
            debug!(offset = ack.offset, "OTA ack with nothing in flight ignored");
            return Vec::new();
        };

        if !ack.is_ok() {
            warn!(
                phase = %self.phase,
                code = ack.code,
                result = ?ack.result(),
                "device rejected OTA frame"
            );
            return self.fail(OtaFailure::DeviceRejected {
                phase: self.phase,
                code: ack.code,
            });
        }

        match self.phase {
            OtaPhase::Start => {
                if ack.offset != 0 {
                    debug!(offset = ack.offset, "start ack with non-zero offset ignored");
                    return Vec::new();
                }
                self.phase = OtaPhase::Data;
                self.offset = 0;
                self.retries = 0;
                let mut actions = vec![self.progress(0)];
                actions.extend(self.send_current());
                actions
            }
            OtaPhase::Data => {
                // A resent start frame can be answered after chunk 0 went out;
                // that answer carries offset 0 and the Prepared state.
                if ack.status.and_then(|s| s.state()) == Some(OtaDeviceState::Prepared) {
                    debug!(offset = ack.offset, "late start ack during data phase ignored");
                    return Vec::new();
                }
                if ack.offset as usize != in_flight.offset {
                    debug!(
                        expected = in_flight.offset,
                        got = ack.offset,
                        "data ack offset mismatch, waiting for retry"
                    );
                    return Vec::new();
                }
                self.offset = in_flight.offset + in_flight.len;
                self.retries = 0;
                let percent = match ack.status {
                    Some(status) => status.progress.min(100),
                    None => self.offset_percent(),
                };
                if self.offset >= self.total() {
                    self.phase = OtaPhase::End;
                }
                let mut actions = vec![self.progress(percent)];
                actions.extend(self.send_current());
                actions
            }
            OtaPhase::End => {
                if ack.offset != 0 {
                    debug!(offset = ack.offset, "end ack with non-zero offset ignored");
                    return Vec::new();
                }
                info!(total = self.total(), "OTA transfer completed");
                self.finish(OtaOutcome::Completed)
            }
            OtaPhase::Idle => Vec::new(),
        }
    }

    /// Handles expiry of the timer armed with `generation`.
    pub fn on_timeout(&mut self, generation: u64) -> Vec<OtaAction> {
        if generation != self.generation || self.is_finished() {
            return Vec::new();
        }
        let Some(in_flight) = self.in_flight.clone() else {
            return Vec::new();
        };

        self.retries += 1;

        if self.should_fall_back() {
            warn!(
                retries = self.retries,
                fallback_chunk_size = self.config.fallback_chunk_size,
                "first chunk keeps timing out, restarting with fallback chunk size"
            );
            self.fallback_used = true;
            self.chunk_size = self.config.fallback_chunk_size;
            return self.enter_start();
        }

        if self.retries > self.config.max_retries {
            warn!(phase = %self.phase, offset = in_flight.offset, "OTA retry budget exhausted");
            return self.fail(OtaFailure::RetriesExhausted {
                phase: self.phase,
                offset: in_flight.offset as u32,
            });
        }

        debug!(
            phase = %self.phase,
            offset = in_flight.offset,
            retry = self.retries,
            "resending OTA frame"
        );
        self.generation += 1;
        vec![
            OtaAction::Send(in_flight.frame),
            OtaAction::ArmTimer {
                generation: self.generation,
                after: self.config.ack_timeout,
            },
        ]
    }

    /// Tears the session down; no-op once finished.
    pub fn abort(&mut self) -> Vec<OtaAction> {
        if self.is_finished() {
            return Vec::new();
        }
        info!(offset = self.offset, "OTA transfer aborted");
        self.fail(OtaFailure::Aborted)
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn should_fall_back(&self) -> bool {
        self.phase == OtaPhase::Data
            && self.offset == 0
            && !self.fallback_used
            && self.chunk_size > self.config.fallback_chunk_size
            && self.retries >= self.config.fast_fail_retries
    }

    fn enter_start(&mut self) -> Vec<OtaAction> {
        self.phase = OtaPhase::Start;
        self.offset = 0;
        self.retries = 0;
        let mut actions = vec![self.progress(0)];
        actions.extend(self.send_current());
        actions
    }

    /// Builds the frame for the current phase and puts it in flight.
    fn send_current(&mut self) -> Vec<OtaAction> {
        let built = match self.phase {
            OtaPhase::Start => outbound::ota_start(self.total() as u32).map(|f| (0, 0, f)),
            OtaPhase::Data => {
                let end = (self.offset + self.chunk_size).min(self.total());
                let chunk = &self.image[self.offset..end];
                outbound::ota_data(self.offset as u32, chunk).map(|f| (self.offset, chunk.len(), f))
            }
            OtaPhase::End => outbound::ota_end().map(|f| (0, 0, f)),
            OtaPhase::Idle => return Vec::new(),
        };

        let (offset, len, frame) = match built {
            Ok(parts) => parts,
            Err(e) => return self.fail(OtaFailure::Encoding(e)),
        };

        self.generation += 1;
        self.in_flight = Some(InFlight {
            offset,
            len,
            frame: frame.clone(),
        });
        vec![
            OtaAction::Send(frame),
            OtaAction::ArmTimer {
                generation: self.generation,
                after: self.config.ack_timeout,
            },
        ]
    }

    fn offset_percent(&self) -> u8 {
        ((self.offset as u64 * 100) / self.total() as u64).min(100) as u8
    }

    fn progress(&self, percent: u8) -> OtaAction {
        OtaAction::Progress {
            phase: self.phase,
            percent,
            chunk_size: self.chunk_size,
        }
    }

    fn fail(&mut self, failure: OtaFailure) -> Vec<OtaAction> {
        self.finish(OtaOutcome::Failed(failure))
    }

    fn finish(&mut self, outcome: OtaOutcome) -> Vec<OtaAction> {
        let completed = outcome.is_success();
        self.phase = OtaPhase::Idle;
        self.in_flight = None;
        self.outcome = Some(outcome.clone());
        let mut actions = vec![OtaAction::CancelTimer];
        if completed {
            actions.push(OtaAction::Progress {
                phase: OtaPhase::End,
                percent: 100,
                chunk_size: self.chunk_size,
            });
        }
        actions.push(OtaAction::Finished(outcome));
        actions
    }
}
