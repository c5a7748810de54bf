//! Device registry: presence tracking with a timeout sweep.
//!
//! Every presence, heartbeat or status frame is a *sighting*.  For each
//! sighting the registry decides, as one indivisible step, whether the
//! device just came online and a `deviceDiscovered` notification is due:
//!
//! ```text
//!            sighting (notify)              sighting (no notify)
//!  Unknown ───────────────────► Online ◄──────────────────────┐
//!     ▲                           │  └──────────────────────────┘
//!     └──── sweep: silent > timeout (deviceLost) ─┘
//! ```
//!
//! A sighting after a gap longer than the timeout is a new online
//! transition even if the sweep has not yet removed the old entry.
//!
//! On MAC-tagged revisions a device first heard through a MAC-less status
//! frame is keyed by IP until its MAC arrives from that IP; the entry then
//! moves to the MAC key without a second notification.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::domain::device::{DeviceId, DeviceStatus};
use crate::protocol::payloads::MacAddr;

/// Default silence after which a device is considered gone.
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(20);

/// A device known to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub id: DeviceId,
    /// Source address of the latest datagram.
    pub addr: SocketAddr,
    pub mac: Option<MacAddr>,
    pub last_seen: Instant,
    pub discovered: bool,
    pub status: Option<DeviceStatus>,
    pub last_notified: Instant,
}

impl DeviceEntry {
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// One inbound frame that proves a device is alive.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub addr: SocketAddr,
    pub mac: Option<MacAddr>,
    /// Present only for status frames.
    pub status: Option<DeviceStatus>,
}

/// What the registry decided for a sighting.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: DeviceId,
    pub addr: SocketAddr,
    pub mac: Option<MacAddr>,
    /// Emit exactly one `deviceDiscovered` for this sighting.
    pub notify_discovered: bool,
    /// The device was known but had been silent longer than the timeout.
    pub reconnected: bool,
}

/// The notify rule.  Pure: same inputs, same answer.
///
/// A notification is due when the device is unknown, was never marked
/// discovered, or has been silent for longer than `timeout`.
pub fn should_notify(existing: Option<&DeviceEntry>, now: Instant, timeout: Duration) -> bool {
    match existing {
        None => true,
        Some(entry) => entry.is_expired(now, timeout) || !entry.discovered,
    }
}

/// In-memory map of devices, keyed by [`DeviceId`].
///
/// A `BTreeMap` keeps snapshot and sweep output in a stable order, which
/// keeps client replay deterministic.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, DeviceEntry>,
    timeout: Duration,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_TIMEOUT)
    }
}

impl DeviceRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            devices: BTreeMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceEntry> {
        self.devices.get(id)
    }

    /// Looks up a device by the IP it last sent from.
    pub fn find_by_ip(&self, ip: IpAddr) -> Option<&DeviceEntry> {
        self.devices.values().find(|e| e.ip() == ip)
    }

    /// Resolves the registry key for a sighting.
    ///
    /// A MAC wins when present.  Frames without one (status frames on
    /// MAC-tagged revisions) attach to whichever entry last used that IP.
    fn resolve_id(&self, sighting: &Sighting) -> DeviceId {
        match sighting.mac {
            Some(mac) => DeviceId::Mac(mac),
            None => self
                .find_by_ip(sighting.addr.ip())
                .map(|e| e.id)
                .unwrap_or(DeviceId::Ip(sighting.addr.ip())),
        }
    }

    /// Moves the entry keyed by `ip` under the MAC key.
    ///
    /// When the MAC already has an entry the IP entry is folded into it,
    /// keeping whichever sighting is newer.
    fn adopt_ip_entry(&mut self, mac: MacAddr, ip: IpAddr) {
        let Some(mut orphan) = self.devices.remove(&DeviceId::Ip(ip)) else {
            return;
        };
        let id = DeviceId::Mac(mac);
        debug!(from = %orphan.id, to = %id, "re-keying device by MAC");
        match self.devices.get_mut(&id) {
            Some(entry) => {
                if orphan.last_seen > entry.last_seen {
                    entry.addr = orphan.addr;
                    entry.last_seen = orphan.last_seen;
                    entry.last_notified = entry.last_notified.max(orphan.last_notified);
                    entry.status = orphan.status.or(entry.status);
                } else {
                    entry.status = entry.status.or(orphan.status);
                }
            }
            None => {
                orphan.id = id;
                orphan.mac = Some(mac);
                self.devices.insert(id, orphan);
            }
        }
    }

    /// Records a sighting and returns the discovery decision.
    ///
    /// The status of the sighting replaces the stored one; a sighting
    /// without status keeps the previous snapshot.
    pub fn observe(&mut self, sighting: Sighting, now: Instant) -> Observation {
        if let Some(mac) = sighting.mac {
            self.adopt_ip_entry(mac, sighting.addr.ip());
        }
        let id = self.resolve_id(&sighting);
        let existing = self.devices.get(&id);
        let notify = should_notify(existing, now, self.timeout);
        let reconnected = existing.is_some_and(|e| e.is_expired(now, self.timeout));

        let (status, last_notified, mac) = match existing {
            Some(entry) => (
                sighting.status.or(entry.status),
                if notify { now } else { entry.last_notified },
                sighting.mac.or(entry.mac),
            ),
            None => (sighting.status, now, sighting.mac),
        };

        if notify {
            info!(device = %id, addr = %sighting.addr, reconnected, "device online");
        } else {
            debug!(device = %id, "device sighting");
        }

        self.devices.insert(
            id,
            DeviceEntry {
                id,
                addr: sighting.addr,
                mac,
                last_seen: now,
                discovered: true,
                status,
                last_notified,
            },
        );

        Observation {
            id,
            addr: sighting.addr,
            mac,
            notify_discovered: notify,
            reconnected,
        }
    }

    /// Removes every device silent for longer than the timeout and returns
    /// them, one entry per `deviceLost` notification.
    pub fn sweep(&mut self, now: Instant) -> Vec<DeviceEntry> {
        let timeout = self.timeout;
        let expired: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|e| e.is_expired(now, timeout))
            .map(|e| e.id)
            .collect();

        let lost: Vec<DeviceEntry> = expired
            .iter()
            .filter_map(|id| self.devices.remove(id))
            .collect();
        for entry in &lost {
            info!(device = %entry.id, addr = %entry.addr, "device lost");
        }
        lost
    }

    /// Discovered devices that are still online, for replay to a new client.
    pub fn snapshot(&self, now: Instant) -> Vec<&DeviceEntry> {
        self.devices
            .values()
            .filter(|e| e.discovered && !e.is_expired(now, self.timeout))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::DeviceMode;

    const TIMEOUT: Duration = Duration::from_secs(20);

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([192, 168, 4, last], 8888))
    }

    fn sighting(last: u8) -> Sighting {
        Sighting {
            addr: addr(last),
            mac: None,
            status: None,
        }
    }

    fn status(servo: u8) -> DeviceStatus {
        DeviceStatus {
            mode: DeviceMode::Remote,
            servo,
            distance: 10.0,
            ir: [0, 0, 0],
        }
    }

    #[test]
    fn test_first_sighting_notifies() {
        let mut reg = DeviceRegistry::new(TIMEOUT);

        let obs = reg.observe(sighting(2), Instant::now());

        assert!(obs.notify_discovered);
        assert!(!obs.reconnected);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_repeated_sightings_within_timeout_notify_once() {
        // Arrange
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();

        // Act
        let notifications = (0..10)
            .map(|i| reg.observe(sighting(2), t0 + Duration::from_secs(i)))
            .filter(|o| o.notify_discovered)
            .count();

        // Assert
        assert_eq!(notifications, 1);
    }

    #[test]
    fn test_sighting_after_gap_renotifies_as_reconnect() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        reg.observe(sighting(2), t0);

        let obs = reg.observe(sighting(2), t0 + TIMEOUT + Duration::from_millis(1));

        assert!(obs.notify_discovered);
        assert!(obs.reconnected);
    }

    #[test]
    fn test_gap_equal_to_timeout_is_still_online() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        reg.observe(sighting(2), t0);

        let obs = reg.observe(sighting(2), t0 + TIMEOUT);

        assert!(!obs.notify_discovered);
    }

    #[test]
    fn test_should_notify_is_deterministic() {
        let t0 = Instant::now();
        let entry = DeviceEntry {
            id: DeviceId::Ip(addr(2).ip()),
            addr: addr(2),
            mac: None,
            last_seen: t0,
            discovered: false,
            status: None,
            last_notified: t0,
        };
        assert!(should_notify(Some(&entry), t0, TIMEOUT));
        assert!(should_notify(None, t0, TIMEOUT));

        let discovered = DeviceEntry {
            discovered: true,
            ..entry
        };
        assert!(!should_notify(Some(&discovered), t0 + Duration::from_secs(1), TIMEOUT));
        assert!(should_notify(Some(&discovered), t0 + Duration::from_secs(21), TIMEOUT));
    }

    #[test]
    fn test_status_is_carried_over_by_statusless_sighting() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        reg.observe(
            Sighting {
                status: Some(status(45)),
                ..sighting(2)
            },
            t0,
        );

        reg.observe(sighting(2), t0 + Duration::from_secs(1));

        let entry = reg.find_by_ip(addr(2).ip()).unwrap();
        assert_eq!(entry.status, Some(status(45)));
    }

    #[test]
    fn test_newer_status_replaces_older() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        for servo in [10, 20] {
            reg.observe(
                Sighting {
                    status: Some(status(servo)),
                    ..sighting(2)
                },
                t0,
            );
        }
        assert_eq!(reg.find_by_ip(addr(2).ip()).unwrap().status, Some(status(20)));
    }

    #[test]
    fn test_sweep_removes_only_expired_devices() {
        // Arrange
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        reg.observe(sighting(2), t0);
        reg.observe(sighting(3), t0 + Duration::from_secs(15));

        // Act
        let lost = reg.sweep(t0 + Duration::from_secs(25));

        // Assert
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].addr, addr(2));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_sweep_reports_each_lost_device_once() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        reg.observe(sighting(2), t0);

        let first = reg.sweep(t0 + Duration::from_secs(30));
        let second = reg.sweep(t0 + Duration::from_secs(35));

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_mac_identity_survives_ip_change() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        let mac = MacAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);
        reg.observe(
            Sighting {
                mac: Some(mac),
                ..sighting(2)
            },
            t0,
        );

        let obs = reg.observe(
            Sighting {
                mac: Some(mac),
                ..sighting(9)
            },
            t0 + Duration::from_secs(1),
        );

        assert!(!obs.notify_discovered);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&DeviceId::Mac(mac)).unwrap().addr, addr(9));
    }

    #[test]
    fn test_macless_status_attaches_to_mac_entry_by_ip() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        let mac = MacAddr([1, 2, 3, 4, 5, 6]);
        reg.observe(
            Sighting {
                mac: Some(mac),
                ..sighting(2)
            },
            t0,
        );

        let obs = reg.observe(
            Sighting {
                status: Some(status(30)),
                ..sighting(2)
            },
            t0,
        );

        assert_eq!(obs.id, DeviceId::Mac(mac));
        assert_eq!(obs.mac, Some(mac));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_status_then_mac_presence_from_same_ip_is_one_device() {
        // Arrange: a status frame arrives before any MAC-tagged frame
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        let mac = MacAddr([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        let first = reg.observe(
            Sighting {
                status: Some(status(45)),
                ..sighting(2)
            },
            t0,
        );

        // Act
        let obs = reg.observe(
            Sighting {
                mac: Some(mac),
                ..sighting(2)
            },
            t0 + Duration::from_secs(1),
        );

        // Assert
        assert!(first.notify_discovered);
        assert!(!obs.notify_discovered);
        assert_eq!(obs.id, DeviceId::Mac(mac));
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&DeviceId::Ip(addr(2).ip())).is_none());
        let entry = reg.get(&DeviceId::Mac(mac)).unwrap();
        assert_eq!(entry.mac, Some(mac));
        assert_eq!(entry.status, Some(status(45)));
    }

    #[test]
    fn test_alternating_status_and_mac_presence_stays_online() {
        // Arrange
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        let mac = MacAddr([0x10, 0x20, 0x30, 0x40, 0x50, 0x61]);
        let mut discovered = 0;
        let mut lost = 0;

        // Act: one status and one MAC presence every 2 s for a minute
        for tick in 0..30u64 {
            let now = t0 + Duration::from_secs(tick * 2);
            let status_obs = reg.observe(
                Sighting {
                    status: Some(status(tick as u8)),
                    ..sighting(2)
                },
                now,
            );
            let presence_obs = reg.observe(
                Sighting {
                    mac: Some(mac),
                    ..sighting(2)
                },
                now,
            );
            discovered += [status_obs, presence_obs]
                .iter()
                .filter(|o| o.notify_discovered)
                .count();
            lost += reg.sweep(now).len();
        }

        // Assert
        assert_eq!(discovered, 1);
        assert_eq!(lost, 0);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&DeviceId::Mac(mac)).is_some());
    }

    #[test]
    fn test_ip_entry_folds_into_existing_mac_entry() {
        // Arrange: the device moved to a new IP and reported status from it
        // before announcing its MAC there
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        let mac = MacAddr([0x10, 0x20, 0x30, 0x40, 0x50, 0x62]);
        reg.observe(
            Sighting {
                mac: Some(mac),
                ..sighting(2)
            },
            t0,
        );
        reg.observe(
            Sighting {
                status: Some(status(70)),
                ..sighting(9)
            },
            t0 + Duration::from_secs(1),
        );
        assert_eq!(reg.len(), 2);

        // Act
        let obs = reg.observe(
            Sighting {
                mac: Some(mac),
                ..sighting(9)
            },
            t0 + Duration::from_secs(2),
        );

        // Assert
        assert!(!obs.notify_discovered);
        assert_eq!(reg.len(), 1);
        let entry = reg.get(&DeviceId::Mac(mac)).unwrap();
        assert_eq!(entry.addr, addr(9));
        assert_eq!(entry.status, Some(status(70)));
    }

    #[test]
    fn test_snapshot_excludes_expired_devices() {
        let mut reg = DeviceRegistry::new(TIMEOUT);
        let t0 = Instant::now();
        reg.observe(sighting(2), t0);
        reg.observe(sighting(3), t0 + Duration::from_secs(10));

        let snap = reg.snapshot(t0 + Duration::from_secs(25));

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].addr, addr(3));
    }
}
