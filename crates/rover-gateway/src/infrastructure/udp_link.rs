//! The device-facing UDP socket.
//!
//! One socket serves both directions: it is bound to the device listen port,
//! receives presence broadcasts, status frames and acknowledgments, and
//! sends every command.  The receive loop runs in its own task and hands
//! each datagram to the reactor through its event channel; sending goes
//! through the [`DatagramSender`] seam so the reactor can be tested without
//! a socket.
//!
//! # Read timeout
//!
//! Each `recv_from` is bounded by a short timeout.  On expiry the loop checks
//! the `running` flag and exits cleanly once the gateway shuts down.

use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::infrastructure::reactor::GatewayEvent;

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65_507;

/// How long one `recv_from` waits before the loop re-checks `running`.
const RECV_POLL: Duration = Duration::from_millis(500);

/// Error type for the UDP link.
#[derive(Debug, Error)]
pub enum UdpLinkError {
    /// The UDP socket could not be bound.
    #[error("failed to bind device socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Sends one datagram to one address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatagramSender: Send + Sync {
    async fn send_datagram(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSender for UdpSocket {
    async fn send_datagram(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.send_to(bytes, addr).await
    }
}

/// The bound device socket.
#[derive(Debug, Clone)]
pub struct UdpLink {
    socket: Arc<UdpSocket>,
}

impl UdpLink {
    /// Binds the device socket.
    ///
    /// # Errors
    ///
    /// Returns [`UdpLinkError::BindFailed`] if the address is in use or not
    /// available.
    pub async fn bind(addr: SocketAddr) -> Result<Self, UdpLinkError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| UdpLinkError::BindFailed { addr, source })?;
        if let Err(e) = socket.set_broadcast(true) {
            debug!("could not enable SO_BROADCAST: {e}");
        }
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The sending half, shared with the reactor.
    pub fn sender(&self) -> Arc<dyn DatagramSender> {
        Arc::clone(&self.socket) as Arc<dyn DatagramSender>
    }

    /// Spawns the receive loop.  It forwards every datagram as a
    /// [`GatewayEvent::Datagram`] and ends when `running` is cleared or the
    /// reactor has gone away.
    pub fn spawn_receiver(
        &self,
        events: mpsc::Sender<GatewayEvent>,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            recv_loop(socket, events, running).await;
        })
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    events: mpsc::Sender<GatewayEvent>,
    running: Arc<AtomicBool>,
) {
    if let Ok(addr) = socket.local_addr() {
        info!("listening for devices on UDP {addr}");
    }
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while running.load(Ordering::Relaxed) {
        let (len, from) = match timeout(RECV_POLL, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                // ICMP port-unreachable from a vanished device surfaces here
                // on some platforms; keep listening.
                error!("UDP recv error: {e}");
                continue;
            }
            Err(_) => continue,
        };

        debug!(%from, len, "datagram received");
        let event = GatewayEvent::Datagram {
            from,
            bytes: buf[..len].to_vec(),
        };
        if events.send(event).await.is_err() {
            debug!("reactor gone; stopping UDP receive loop");
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
