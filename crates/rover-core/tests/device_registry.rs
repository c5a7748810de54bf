//! Integration tests for discovery de-duplication and the timeout sweep.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rover_core::domain::registry::DeviceRegistry;
use rover_core::protocol::outbound;
use rover_core::{parse_datagram, InboundFrame, ProtocolRevision, Sighting};

const TIMEOUT: Duration = Duration::from_secs(20);
const SWEEP: Duration = Duration::from_secs(5);

fn device() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 7], 8888))
}

/// Parses a datagram the way the gateway does and turns it into a sighting.
fn sighting_from(bytes: &[u8]) -> Sighting {
    let frame = parse_datagram(ProtocolRevision::V2, bytes).expect("valid frame");
    let status = match &frame {
        InboundFrame::Status(s) => Some(*s),
        _ => None,
    };
    Sighting {
        addr: device(),
        mac: frame.mac(),
        status,
    }
}

#[test]
fn test_n_frames_within_window_fire_one_discovery() {
    // Arrange
    let mut registry = DeviceRegistry::new(TIMEOUT);
    let heartbeat = outbound::heartbeat(ProtocolRevision::V2, None).unwrap();
    let t0 = Instant::now();

    // Act: one heartbeat per second for a minute
    let discovered = (0..60)
        .map(|s| registry.observe(sighting_from(&heartbeat), t0 + Duration::from_secs(s)))
        .filter(|o| o.notify_discovered)
        .count();

    // Assert
    assert_eq!(discovered, 1);
}

#[test]
fn test_gap_beyond_timeout_fires_exactly_one_more() {
    let mut registry = DeviceRegistry::new(TIMEOUT);
    let presence = outbound::presence(ProtocolRevision::V2, None).unwrap();
    let t0 = Instant::now();
    registry.observe(sighting_from(&presence), t0);

    let resume = t0 + TIMEOUT + Duration::from_secs(3);
    let first = registry.observe(sighting_from(&presence), resume);
    let second = registry.observe(sighting_from(&presence), resume + Duration::from_secs(1));

    assert!(first.notify_discovered);
    assert!(first.reconnected);
    assert!(!second.notify_discovered);
}

#[test]
fn test_lost_device_detected_within_one_sweep_after_threshold() {
    // Arrange
    let mut registry = DeviceRegistry::new(TIMEOUT);
    let heartbeat = outbound::heartbeat(ProtocolRevision::V2, None).unwrap();
    let t0 = Instant::now();
    registry.observe(sighting_from(&heartbeat), t0);

    // Act: sweep on a fixed period until the device goes away
    let mut lost_at = None;
    let mut lost_events = 0;
    for tick in 1..=10u32 {
        let now = t0 + SWEEP * tick;
        let lost = registry.sweep(now);
        lost_events += lost.len();
        if !lost.is_empty() && lost_at.is_none() {
            lost_at = Some(now);
        }
    }

    // Assert
    let lost_at = lost_at.expect("device must be reported lost");
    assert!(lost_at.duration_since(t0) <= TIMEOUT + SWEEP);
    assert_eq!(lost_events, 1);
    assert!(registry.is_empty());
}

#[test]
fn test_status_frame_both_discovers_and_carries_status() {
    let mut registry = DeviceRegistry::new(TIMEOUT);
    let status = rover_core::DeviceStatus {
        mode: rover_core::DeviceMode::Remote,
        servo: 100,
        distance: 5.5,
        ir: [0, 1, 0],
    };
    let bytes = outbound::status(ProtocolRevision::V2, &status).unwrap();

    let obs = registry.observe(sighting_from(&bytes), Instant::now());

    assert!(obs.notify_discovered);
    let entry = registry.get(&obs.id).expect("entry exists");
    assert_eq!(entry.status.map(|s| s.servo), Some(100));
}
