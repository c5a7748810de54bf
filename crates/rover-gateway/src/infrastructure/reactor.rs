//! The reactor task: sole owner of the gateway state.
//!
//! Every input reaches the reactor as a [`GatewayEvent`] on one `mpsc`
//! channel: datagrams from the UDP receive loop, connects, messages and
//! disconnects from WebSocket sessions.  Alongside the channel the reactor
//! waits on two timers, the registry sweep and the earliest pending OTA
//! acknowledgment deadline.  Each wake-up runs one [`GatewayCore`] handler
//! to completion and executes its effects before the next one starts.
//!
//! ```text
//!  UDP recv loop ─┐
//!  WS session ────┼──► mpsc ──► Reactor ──► GatewayCore::on_*() ──► Effects
//!  WS session ────┘               ▲                                   │
//!                 sweep tick ─────┤            ClientHub ◄── Broadcast/SendToClient
//!                 OTA deadline ───┘         DatagramSender ◄── SendDatagram
//!                                             timer table ◄── Arm/CancelOtaTimer
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::{Effect, GatewayCore};
use crate::domain::client::ClientId;
use crate::domain::config::GatewayConfig;
use crate::infrastructure::client_hub::ClientHub;
use crate::infrastructure::udp_link::DatagramSender;

/// How often the loop re-checks the `running` flag when otherwise idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Inputs of the reactor.
#[derive(Debug)]
pub enum GatewayEvent {
    Datagram {
        from: SocketAddr,
        bytes: Vec<u8>,
    },
    ClientConnected {
        id: ClientId,
        outbox: mpsc::Sender<Arc<str>>,
    },
    ClientMessage {
        id: ClientId,
        text: String,
    },
    ClientBinary {
        id: ClientId,
        bytes: Vec<u8>,
    },
    ClientDisconnected {
        id: ClientId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OtaTimer {
    generation: u64,
    deadline: Instant,
}

/// Owns the core, the client hub and the OTA timer table.
pub struct Reactor {
    core: GatewayCore,
    hub: ClientHub,
    sender: Arc<dyn DatagramSender>,
    timers: HashMap<IpAddr, OtaTimer>,
    sweep_interval: Duration,
}

impl Reactor {
    pub fn new(config: &GatewayConfig, sender: Arc<dyn DatagramSender>) -> Self {
        Self {
            core: GatewayCore::new(config),
            hub: ClientHub::new(),
            sender,
            timers: HashMap::new(),
            sweep_interval: config.sweep_interval,
        }
    }

    pub fn core(&self) -> &GatewayCore {
        &self.core
    }

    pub fn hub(&self) -> &ClientHub {
        &self.hub
    }

    /// Earliest pending OTA deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Runs until `running` is cleared or every event sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<GatewayEvent>, running: Arc<AtomicBool>) {
        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await; // Skip the immediate first tick.
        let mut shutdown_poll = interval(SHUTDOWN_POLL);

        info!(
            revision = %self.core.revision(),
            sweep_ms = self.sweep_interval.as_millis() as u64,
            "reactor started"
        );

        while running.load(Ordering::Relaxed) {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, Instant::now()).await,
                    None => {
                        debug!("all event senders dropped");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    let now = Instant::now();
                    let effects = self.core.on_sweep(now);
                    self.execute(effects, now).await;
                }
                _ = wait_for(deadline) => {
                    self.fire_due_timers(Instant::now()).await;
                }
                _ = shutdown_poll.tick() => {}
            }
        }

        info!("reactor stopped");
    }

    /// Runs the core handler for one event and executes its effects.
    pub async fn handle_event(&mut self, event: GatewayEvent, now: Instant) {
        let effects = match event {
            GatewayEvent::Datagram { from, bytes } => self.core.on_datagram(from, &bytes, now),
            GatewayEvent::ClientConnected { id, outbox } => {
                self.hub.register(id, outbox);
                info!(client = %id, clients = self.hub.len(), "client connected");
                self.core.on_client_connected(id, now)
            }
            GatewayEvent::ClientMessage { id, text } => self.core.on_client_message(id, &text),
            GatewayEvent::ClientBinary { id, bytes } => self.core.on_client_binary(id, &bytes),
            GatewayEvent::ClientDisconnected { id } => {
                if self.hub.unregister(id) {
                    info!(client = %id, clients = self.hub.len(), "client disconnected");
                }
                Vec::new()
            }
        };
        self.execute(effects, now).await;
    }

    /// Fires every OTA timer whose deadline is at or before `now`.
    pub async fn fire_due_timers(&mut self, now: Instant) {
        let due: Vec<(IpAddr, u64)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(device, t)| (*device, t.generation))
            .collect();

        for (device, generation) in due {
            self.timers.remove(&device);
            debug!(%device, generation, "OTA ack timer expired");
            let effects = self.core.on_ota_timeout(device, generation);
            self.execute(effects, now).await;
        }
    }

    /// Carries out `effects` in order.
    pub async fn execute(&mut self, effects: Vec<Effect>, now: Instant) {
        for effect in effects {
            match effect {
                Effect::Broadcast(message) => {
                    let report = self.hub.broadcast(&message);
                    if report.removed > 0 {
                        debug!(removed = report.removed, "dropped closed clients");
                    }
                }
                Effect::SendToClient { client, message } => {
                    self.hub.send_to(client, &message);
                }
                Effect::SendDatagram { addr, bytes } => {
                    if let Err(e) = self.sender.send_datagram(&bytes, addr).await {
                        warn!(%addr, "UDP send failed: {e}");
                    }
                }
                Effect::ArmOtaTimer {
                    device,
                    generation,
                    after,
                } => {
                    self.timers.insert(
                        device,
                        OtaTimer {
                            generation,
                            deadline: now + after,
                        },
                    );
                }
                Effect::CancelOtaTimer { device } => {
                    self.timers.remove(&device);
                }
            }
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
