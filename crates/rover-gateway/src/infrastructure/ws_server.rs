//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Accepting incoming TCP connections from clients.
//! 2. Upgrading each connection to a WebSocket session.
//! 3. Registering the session with the reactor together with a bounded
//!    outbox, then running three concurrent tasks per session:
//!    - **Outbox → Client**: writes queued JSON messages as text frames.
//!    - **Client → Reactor**: forwards text and binary frames as events.
//!    - **Keepalive**: sends a WebSocket ping every keepalive interval.
//! 4. Unregistering the session when any of the three tasks ends.
//! 5. Stopping the accept loop when the `running` flag is cleared.
//!
//! A session never touches gateway state directly; everything goes through
//! the reactor's event channel.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::domain::client::ClientId;
use crate::infrastructure::reactor::GatewayEvent;

/// Per-session settings taken from the gateway configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub queue_depth: usize,
    pub keepalive_interval: Duration,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    settings: SessionSettings,
    events: mpsc::Sender<GatewayEvent>,
    running: Arc<AtomicBool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket server listening on {addr}");
    }

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Bounded accept so the `running` flag is polled even when idle.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                info!("new client connection from {peer_addr}");
                let events = events.clone();
                tokio::spawn(async move {
                    handle_client_session(stream, peer_addr, settings, events).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Wraps [`run_session`] and logs the outcome.
async fn handle_client_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    settings: SessionSettings,
    events: mpsc::Sender<GatewayEvent>,
) {
    match run_session(raw_stream, peer_addr, settings, events).await {
        Ok(()) => info!("session {peer_addr} closed normally"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of a single client session.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails or the reactor is no
/// longer running.
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    settings: SessionSettings,
    events: mpsc::Sender<GatewayEvent>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let id = ClientId::new();
    info!("WebSocket session established: {peer_addr} (client {id})");

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx = Arc::new(tokio::sync::Mutex::new(ws_tx));

    let (outbox, mut outbox_rx) = mpsc::channel::<Arc<str>>(settings.queue_depth);
    events
        .send(GatewayEvent::ClientConnected { id, outbox })
        .await
        .context("reactor is not running")?;

    // ── Task A: Outbox → Client ───────────────────────────────────────────────
    let ws_tx_out = Arc::clone(&ws_tx);
    let outbox_task = tokio::spawn(async move {
        while let Some(text) = outbox_rx.recv().await {
            let mut sink = ws_tx_out.lock().await;
            if sink.send(WsMessage::Text(text.to_string())).await.is_err() {
                debug!("client {id}: WebSocket send failed (client disconnected)");
                break;
            }
        }
    });

    // ── Task B: Client → Reactor ──────────────────────────────────────────────
    let events_in = events.clone();
    let inbound_task = tokio::spawn(async move {
        loop {
            let ws_msg = match ws_rx.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                    debug!("client {id}: WebSocket closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!("client {id}: WebSocket error: {e}");
                    break;
                }
                None => {
                    debug!("client {id}: stream ended");
                    break;
                }
            };

            let event = match ws_msg {
                WsMessage::Text(text) => GatewayEvent::ClientMessage { id, text },
                WsMessage::Binary(bytes) => GatewayEvent::ClientBinary { id, bytes },
                WsMessage::Ping(data) => {
                    debug!("client {id}: WebSocket ping ({} bytes)", data.len());
                    continue;
                }
                WsMessage::Pong(_) => {
                    debug!("client {id}: WebSocket pong received");
                    continue;
                }
                WsMessage::Close(_) => {
                    debug!("client {id}: WebSocket Close frame received");
                    break;
                }
                WsMessage::Frame(_) => continue,
            };

            if events_in.send(event).await.is_err() {
                debug!("client {id}: reactor gone");
                break;
            }
        }
    });

    // ── Task C: Keepalive ping ────────────────────────────────────────────────
    let ws_tx_ping = Arc::clone(&ws_tx);
    let keepalive_interval = settings.keepalive_interval;
    let keepalive_task = tokio::spawn(async move {
        let mut ticker = interval(keepalive_interval);
        ticker.tick().await; // Skip the immediate first tick.

        loop {
            ticker.tick().await;
            let mut sink = ws_tx_ping.lock().await;
            if let Err(e) = sink.send(WsMessage::Ping(Vec::new())).await {
                debug!("client {id}: keepalive ping failed: {e}");
                break;
            }
        }
    });

    // The session ends as soon as any task finishes; the rest are aborted.
    let outbox_abort = outbox_task.abort_handle();
    let inbound_abort = inbound_task.abort_handle();
    let keepalive_abort = keepalive_task.abort_handle();
    tokio::select! {
        _ = outbox_task => debug!("client {id}: outbox task ended"),
        _ = inbound_task => debug!("client {id}: inbound task ended"),
        _ = keepalive_task => debug!("client {id}: keepalive task ended"),
    }
    outbox_abort.abort();
    inbound_abort.abort();
    keepalive_abort.abort();

    // Best effort: the reactor may already be shutting down.
    let _ = events.send(GatewayEvent::ClientDisconnected { id }).await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio_tungstenite::connect_async;

    fn settings() -> SessionSettings {
        SessionSettings {
            queue_depth: 8,
            keepalive_interval: Duration::from_secs(15),
        }
    }

    async fn start() -> (SocketAddr, mpsc::Receiver<GatewayEvent>, Arc<AtomicBool>) {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(serve(listener, settings(), tx, Arc::clone(&running)));
        (addr, rx, running)
    }

    async fn next_event(rx: &mut mpsc::Receiver<GatewayEvent>) -> GatewayEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_session_registers_forwards_and_unregisters() {
        // Arrange
        let (addr, mut rx, running) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        // Act / Assert: connect
        let GatewayEvent::ClientConnected { id, outbox } = next_event(&mut rx).await else {
            panic!("expected ClientConnected");
        };

        // Act / Assert: text frame from the client becomes a ClientMessage
        ws.send(WsMessage::Text(r#"{"type":"otaQuery","deviceIP":"1.2.3.4"}"#.into()))
            .await
            .unwrap();
        match next_event(&mut rx).await {
            GatewayEvent::ClientMessage { id: from, text } => {
                assert_eq!(from, id);
                assert!(text.contains("otaQuery"));
            }
            other => panic!("expected ClientMessage, got {other:?}"),
        }

        // Act / Assert: outbox messages reach the client as text frames
        outbox.send(Arc::from(r#"{"type":"deviceLost","ip":"1.2.3.4"}"#)).await.unwrap();
        let frame = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame, WsMessage::Text(r#"{"type":"deviceLost","ip":"1.2.3.4"}"#.into()));

        // Act / Assert: closing unregisters
        ws.close(None).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            GatewayEvent::ClientDisconnected { id: gone } if gone == id
        ));

        running.store(false, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn test_binary_frame_becomes_client_binary_event() {
        let (addr, mut rx, running) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        // Holding the outbox keeps the session alive.
        let _connected = next_event(&mut rx).await;

        ws.send(WsMessage::Binary(vec![0xF0, 1, 2])).await.unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            GatewayEvent::ClientBinary { bytes, .. } if bytes == vec![0xF0, 1, 2]
        ));
        running.store(false, Ordering::Relaxed);
    }
}
