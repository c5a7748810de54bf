//! Wires the UDP link, the reactor and the WebSocket server together.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::domain::config::GatewayConfig;
use crate::infrastructure::reactor::{GatewayEvent, Reactor};
use crate::infrastructure::udp_link::UdpLink;
use crate::infrastructure::ws_server::{serve, SessionSettings};

/// Capacity of the reactor's event channel.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// A started gateway.
#[derive(Debug)]
pub struct GatewayHandle {
    ws_addr: SocketAddr,
    device_addr: SocketAddr,
    running: Arc<AtomicBool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl GatewayHandle {
    /// Address the WebSocket server actually listens on.
    pub fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    /// Address of the device socket.
    pub fn device_addr(&self) -> SocketAddr {
        self.device_addr
    }

    /// Clears the `running` flag; every task stops within its poll interval.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Waits for the accept loop, the UDP receive loop and the reactor.
    pub async fn wait(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                error!("{name} task failed: {e}");
            }
        }
    }
}

/// Binds both sockets and spawns the gateway tasks.
///
/// # Errors
///
/// Returns an error if either socket cannot be bound.
pub async fn start_gateway(
    config: &GatewayConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<GatewayHandle> {
    let link = UdpLink::bind(config.device_listen_addr)
        .await
        .context("failed to start device link")?;
    let device_addr = link
        .local_addr()
        .context("failed to read device socket address")?;

    let listener = TcpListener::bind(config.ws_bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.ws_bind_addr))?;
    let ws_addr = listener
        .local_addr()
        .context("failed to read WebSocket listener address")?;

    let (events_tx, events_rx) = mpsc::channel::<GatewayEvent>(EVENT_QUEUE_DEPTH);

    let reactor = Reactor::new(config, link.sender());
    let reactor_running = Arc::clone(&running);
    let reactor_task = tokio::spawn(async move {
        reactor.run(events_rx, reactor_running).await;
    });

    let receiver_task = link.spawn_receiver(events_tx.clone(), Arc::clone(&running));

    let settings = SessionSettings {
        queue_depth: config.client_queue_depth,
        keepalive_interval: config.keepalive_interval,
    };
    let server_task = tokio::spawn(serve(listener, settings, events_tx, Arc::clone(&running)));

    info!(
        ws = %ws_addr,
        devices = %device_addr,
        device_port = config.device_send_port,
        revision = %config.revision,
        "gateway started"
    );

    Ok(GatewayHandle {
        ws_addr,
        device_addr,
        running,
        tasks: vec![
            ("accept loop", server_task),
            ("UDP receive loop", receiver_task),
            ("reactor", reactor_task),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    fn loopback_config() -> GatewayConfig {
        GatewayConfig {
            ws_bind_addr: loopback(),
            device_listen_addr: loopback(),
            ..GatewayConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_gateway_reports_ws_bind_failure() {
        // Arrange: occupy a port
        let taken = TcpListener::bind(loopback()).await.unwrap();
        let config = GatewayConfig {
            ws_bind_addr: taken.local_addr().unwrap(),
            ..loopback_config()
        };

        // Act
        let result = start_gateway(&config, Arc::new(AtomicBool::new(true))).await;

        // Assert
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to bind WebSocket listener"));
    }

    #[tokio::test]
    async fn test_started_gateway_reports_bound_ports_and_stops() {
        // Arrange
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let handle = start_gateway(&loopback_config(), Arc::clone(&running))
            .await
            .unwrap();

        // Assert
        assert_ne!(handle.ws_addr().port(), 0);
        assert_ne!(handle.device_addr().port(), 0);
        handle.shutdown();
        assert!(!running.load(Ordering::Relaxed));
        tokio::time::timeout(Duration::from_secs(3), handle.wait())
            .await
            .unwrap();
    }
}
