//! Fan-out of server messages to connected WebSocket clients.
//!
//! Each client session owns a bounded queue whose receiving end feeds its
//! WebSocket writer.  The hub only ever calls `try_send`, so one slow or dead
//! client can never stall delivery to the others:
//!
//! - queue full   → message skipped for that client, others still get it
//! - queue closed → client removed from the hub
//!
//! Messages are serialized once per broadcast and shared as `Arc<str>`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

use crate::domain::client::ClientId;
use crate::domain::messages::ServerMessage;

/// Per-client counts of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Clients whose queue was full.
    pub skipped: usize,
    /// Clients whose session had ended; they are no longer registered.
    pub removed: usize,
}

/// Registered client outboxes.
#[derive(Debug, Default)]
pub struct ClientHub {
    clients: HashMap<ClientId, mpsc::Sender<Arc<str>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ClientId, outbox: mpsc::Sender<Arc<str>>) {
        self.clients.insert(id, outbox);
        debug!(client = %id, clients = self.clients.len(), "client registered");
    }

    /// Returns `true` if the client was registered.
    pub fn unregister(&mut self, id: ClientId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            debug!(client = %id, clients = self.clients.len(), "client unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Queues `message` for every registered client.
    pub fn broadcast(&mut self, message: &ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Some(text) = encode(message) else {
            return report;
        };

        let mut closed = Vec::new();
        for (id, outbox) in &self.clients {
            match outbox.try_send(Arc::clone(&text)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(client = %id, "client queue full, message skipped");
                    report.skipped += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            self.clients.remove(&id);
            report.removed += 1;
        }
        report
    }

    /// Queues `message` for one client.  Returns `true` if it was queued.
    pub fn send_to(&mut self, id: ClientId, message: &ServerMessage) -> bool {
        let Some(outbox) = self.clients.get(&id) else {
            debug!(client = %id, "message for unknown client dropped");
            return false;
        };
        let Some(text) = encode(message) else {
            return false;
        };
        match outbox.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = %id, "client queue full, message skipped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.clients.remove(&id);
                false
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("JSON serialization error: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
