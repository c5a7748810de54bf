//! The gateway core: one state machine behind every event the gateway sees.
//!
//! [`GatewayCore`] owns the device registry and the OTA sessions.  Each
//! handler takes one event (a datagram, a client message, a timer) plus the
//! current time and returns the [`Effect`]s to carry out.  Handlers never
//! touch a socket, so the whole gateway behaviour is testable with plain
//! values, and because a single task owns the core no two handlers ever run
//! at the same time.
//!
//! ```text
//! event ──► GatewayCore::on_*(…, now) ──► Vec<Effect> ──► reactor executes
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use rover_core::{
    parse_datagram, DeviceRegistry, InboundFrame, OtaAction, OtaConfig, OtaOutcome, OtaSession,
    ProtocolRevision, Sighting,
};

use crate::application::command_translation::{
    discovered_message, error_message, lost_message, ota_response_message, status_message,
    translate_binary_frame, translate_client_message, wifi_response_message, ClientRequest,
};
use crate::domain::client::ClientId;
use crate::domain::config::GatewayConfig;
use crate::domain::messages::{ClientMessage, ServerMessage};

/// A side effect requested by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver to every connected client.
    Broadcast(ServerMessage),
    /// Deliver to one client only.
    SendToClient {
        client: ClientId,
        message: ServerMessage,
    },
    SendDatagram {
        addr: SocketAddr,
        bytes: Vec<u8>,
    },
    /// (Re)arm the acknowledgment timer of the transfer to `device`.
    ArmOtaTimer {
        device: IpAddr,
        generation: u64,
        after: Duration,
    },
    CancelOtaTimer {
        device: IpAddr,
    },
}

/// Registry, OTA sessions and the settings both need.
#[derive(Debug)]
pub struct GatewayCore {
    revision: ProtocolRevision,
    device_port: u16,
    ota_config: OtaConfig,
    registry: DeviceRegistry,
    transfers: HashMap<IpAddr, OtaSession>,
}

impl GatewayCore {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            revision: config.revision,
            device_port: config.device_send_port,
            ota_config: config.ota.clone(),
            registry: DeviceRegistry::new(config.device_timeout),
            transfers: HashMap::new(),
        }
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// The engine-driven transfer to `device`, if one is running.
    pub fn transfer(&self, device: IpAddr) -> Option<&OtaSession> {
        self.transfers.get(&device)
    }

    pub fn active_transfers(&self) -> usize {
        self.transfers.len()
    }

    fn device_addr(&self, device: IpAddr) -> SocketAddr {
        SocketAddr::new(device, self.device_port)
    }

    // ── Device side ──────────────────────────────────────────────────────────

    /// Handles one datagram received from `from`.
    ///
    /// Malformed datagrams are dropped with a debug log and produce nothing.
    /// For a frame that both discovers a device and carries a status, the
    /// `deviceDiscovered` broadcast always precedes the `statusUpdate`.
    pub fn on_datagram(&mut self, from: SocketAddr, bytes: &[u8], now: Instant) -> Vec<Effect> {
        let frame = match parse_datagram(self.revision, bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%from, len = bytes.len(), "dropping datagram: {e}");
                return Vec::new();
            }
        };
        let ip = from.ip();

        match frame {
            InboundFrame::Presence { .. }
            | InboundFrame::Heartbeat { .. }
            | InboundFrame::Status(_) => {
                let status = match frame {
                    InboundFrame::Status(status) => Some(status),
                    _ => None,
                };
                let observation = self.registry.observe(
                    Sighting {
                        addr: from,
                        mac: frame.mac(),
                        status,
                    },
                    now,
                );
                let mut effects = Vec::with_capacity(2);
                if observation.notify_discovered {
                    effects.push(Effect::Broadcast(discovered_message(ip, observation.mac)));
                }
                if let Some(status) = status {
                    effects.push(Effect::Broadcast(status_message(ip, &status)));
                }
                effects
            }

            InboundFrame::OtaAck(ack) => {
                debug!(
                    %ip,
                    code = ack.code,
                    result = ?ack.result(),
                    offset = ack.offset,
                    "OTA ack"
                );
                let mut effects = vec![Effect::Broadcast(ota_response_message(ip, &ack))];
                let actions = match self.transfers.get_mut(&ip) {
                    Some(session) => session.on_ack(&ack),
                    None => Vec::new(),
                };
                effects.extend(self.ota_effects(ip, actions));
                effects
            }

            InboundFrame::WifiAck(ack) => {
                info!(%ip, op = ack.op.as_str(), code = ack.code, "WiFi config ack");
                vec![Effect::Broadcast(wifi_response_message(ip, &ack))]
            }
        }
    }

    /// Removes devices silent for longer than the timeout.
    pub fn on_sweep(&mut self, now: Instant) -> Vec<Effect> {
        let lost = self.registry.sweep(now);
        if !self.registry.is_empty() {
            debug!(online = self.registry.len(), "devices online");
        }
        lost.iter()
            .map(|entry| Effect::Broadcast(lost_message(entry)))
            .collect()
    }

    // ── Client side ──────────────────────────────────────────────────────────

    /// Replays the registry so a late-joining client sees every online
    /// device: one `deviceDiscovered` each, then its last status if known.
    pub fn on_client_connected(&self, client: ClientId, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        for entry in self.registry.snapshot(now) {
            effects.push(Effect::SendToClient {
                client,
                message: discovered_message(entry.ip(), entry.mac),
            });
            if let Some(status) = &entry.status {
                effects.push(Effect::SendToClient {
                    client,
                    message: status_message(entry.ip(), status),
                });
            }
        }
        effects
    }

    /// Handles one JSON text frame from `client`.
    ///
    /// Unparseable JSON is logged and ignored.  A well-formed message that
    /// cannot be carried out is logged and answered with an `error` message
    /// to the sender only.
    pub fn on_client_message(&mut self, client: ClientId, text: &str) -> Vec<Effect> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%client, "invalid JSON from client: {e}");
                return Vec::new();
            }
        };
        if !matches!(msg, ClientMessage::OtaData { .. }) {
            debug!(%client, kind = msg.type_name(), device = msg.device_ip(), "client message");
        }

        match translate_client_message(self.revision, &msg) {
            Ok(ClientRequest::Forward(cmd)) => vec![Effect::SendDatagram {
                addr: self.device_addr(cmd.device),
                bytes: cmd.frame,
            }],
            Ok(ClientRequest::StartUpload { device, image }) => {
                self.start_upload(client, device, image)
            }
            Ok(ClientRequest::AbortUpload { device }) => self.abort_upload(client, device),
            Err(e) => {
                warn!(%client, kind = msg.type_name(), "rejected client message: {e}");
                vec![Effect::SendToClient {
                    client,
                    message: error_message(e.to_string(), msg.device_ip().parse().ok()),
                }]
            }
        }
    }

    /// Handles one binary frame from `client` (raw OTA chunk).
    pub fn on_client_binary(&mut self, client: ClientId, bytes: &[u8]) -> Vec<Effect> {
        match translate_binary_frame(self.revision, bytes) {
            Ok(cmd) => vec![Effect::SendDatagram {
                addr: self.device_addr(cmd.device),
                bytes: cmd.frame,
            }],
            Err(e) => {
                warn!(%client, len = bytes.len(), "rejected binary frame: {e}");
                vec![Effect::SendToClient {
                    client,
                    message: error_message(e.to_string(), None),
                }]
            }
        }
    }

    // ── OTA engine ───────────────────────────────────────────────────────────

    /// Expiry of the acknowledgment timer armed for `device`.
    pub fn on_ota_timeout(&mut self, device: IpAddr, generation: u64) -> Vec<Effect> {
        let actions = match self.transfers.get_mut(&device) {
            Some(session) => session.on_timeout(generation),
            None => return Vec::new(),
        };
        self.ota_effects(device, actions)
    }

    fn start_upload(&mut self, client: ClientId, device: IpAddr, image: Vec<u8>) -> Vec<Effect> {
        if self.transfers.contains_key(&device) {
            warn!(%device, "OTA upload rejected: transfer already in progress");
            return vec![Effect::SendToClient {
                client,
                message: error_message(
                    format!("OTA transfer to {device} already in progress"),
                    Some(device),
                ),
            }];
        }

        let mut session = match OtaSession::new(image, self.ota_config.clone()) {
            Ok(session) => session,
            Err(e) => {
                warn!(%device, "OTA upload rejected: {e}");
                return vec![Effect::SendToClient {
                    client,
                    message: error_message(e.to_string(), Some(device)),
                }];
            }
        };

        info!(%device, %client, bytes = session.total(), "OTA upload accepted");
        let actions = session.begin();
        self.transfers.insert(device, session);
        self.ota_effects(device, actions)
    }

    fn abort_upload(&mut self, client: ClientId, device: IpAddr) -> Vec<Effect> {
        match self.transfers.get_mut(&device) {
            Some(session) => {
                let actions = session.abort();
                self.ota_effects(device, actions)
            }
            None => vec![Effect::SendToClient {
                client,
                message: error_message(format!("no OTA transfer to {device}"), Some(device)),
            }],
        }
    }

    /// Maps session actions onto gateway effects; a finished session is
    /// dropped from the table.
    fn ota_effects(&mut self, device: IpAddr, actions: Vec<OtaAction>) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                OtaAction::Send(bytes) => effects.push(Effect::SendDatagram {
                    addr: self.device_addr(device),
                    bytes,
                }),
                OtaAction::ArmTimer { generation, after } => effects.push(Effect::ArmOtaTimer {
                    device,
                    generation,
                    after,
                }),
                OtaAction::CancelTimer => effects.push(Effect::CancelOtaTimer { device }),
                OtaAction::Progress {
                    phase,
                    percent,
                    chunk_size,
                } => effects.push(Effect::Broadcast(ServerMessage::OtaProgress {
                    ip: device.to_string(),
                    phase: phase.to_string(),
                    percent,
                    chunk_size,
                })),
                OtaAction::Finished(outcome) => {
                    self.transfers.remove(&device);
                    let reason = match &outcome {
                        OtaOutcome::Completed => None,
                        OtaOutcome::Failed(failure) => Some(failure.to_string()),
                    };
                    info!(%device, success = outcome.is_success(), "OTA transfer finished");
                    effects.push(Effect::Broadcast(ServerMessage::OtaFinished {
                        ip: device.to_string(),
                        success: outcome.is_success(),
                        reason,
                    }));
                }
            }
        }
        effects
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
