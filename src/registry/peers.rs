//! Peer registry: address -> last-seen instant, with liveness windows and
//! eviction.
//!
//! Discovery, the inbound server and the dispatcher all share one registry.
//! Every operation holds the lock only for the map access itself; callers
//! never do I/O while holding it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::network::protocol::PeerAddress;

/// Thread-safe peer liveness map.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerAddress, Instant>>,
}

/// Age of a sighting relative to `now`. A sighting recorded "after" `now`
/// counts as age zero.
fn age(now: Instant, last_seen: Instant) -> Duration {
    now.saturating_duration_since(last_seen)
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere must not take the registry down with it.
    fn lock(&self) -> MutexGuard<'_, HashMap<PeerAddress, Instant>> {
        self.peers.lock().unwrap_or_else(|poison| {
            tracing::warn!("Peer registry lock poisoned, recovering");
            poison.into_inner()
        })
    }

    /// Record a sighting. Returns true if the peer was not known before.
    ///
    /// The stored instant only moves forward: a late-arriving older sighting
    /// never rolls last-seen back.
    pub fn touch(&self, addr: &PeerAddress, now: Instant) -> bool {
        let mut peers = self.lock();
        match peers.get_mut(addr) {
            Some(last_seen) => {
                if now > *last_seen {
                    *last_seen = now;
                }
                false
            }
            None => {
                peers.insert(addr.clone(), now);
                true
            }
        }
    }

    /// Addresses seen strictly within `window` of `now`.
    pub fn snapshot_active(&self, now: Instant, window: Duration) -> Vec<PeerAddress> {
        self.lock()
            .iter()
            .filter(|(_, seen)| age(now, **seen) < window)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Active peers with their age, freshest first.
    pub fn active_with_age(&self, now: Instant, window: Duration) -> Vec<(PeerAddress, Duration)> {
        let mut active: Vec<(PeerAddress, Duration)> = self
            .lock()
            .iter()
            .map(|(addr, seen)| (addr.clone(), age(now, *seen)))
            .filter(|(_, a)| *a < window)
            .collect();
        active.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        active
    }

    /// Remove a peer. Returns true if it was present.
    pub fn evict(&self, addr: &PeerAddress) -> bool {
        self.lock().remove(addr).is_some()
    }

    /// Remove every peer not seen for longer than `stale_after`. Returns count removed.
    pub fn evict_stale(&self, now: Instant, stale_after: Duration) -> usize {
        let mut peers = self.lock();
        let before = peers.len();
        peers.retain(|addr, seen| {
            let idle = age(now, *seen);
            if idle > stale_after {
                tracing::debug!(peer = %addr, idle_secs = idle.as_secs(), "Evicting stale peer");
                false
            } else {
                true
            }
        });
        before - peers.len()
    }

    pub fn last_seen(&self, addr: &PeerAddress) -> Option<Instant> {
        self.lock().get(addr).copied()
    }

    pub fn contains(&self, addr: &PeerAddress) -> bool {
        self.lock().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count_active(&self, now: Instant, window: Duration) -> usize {
        self.lock()
            .values()
            .filter(|seen| age(now, **seen) < window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::addr;
    use std::sync::Arc;

    #[test]
    fn test_touch_reports_first_sighting_only() {
        let reg = PeerRegistry::new();
        let t0 = Instant::now();
        assert!(reg.touch(&addr("10.0.0.2", 8888), t0));
        assert!(!reg.touch(&addr("10.0.0.2", 8888), t0 + Duration::from_secs(1)));
        assert!(reg.touch(&addr("10.0.0.2", 8889), t0));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_touched_peer_is_active_for_any_positive_window() {
        let reg = PeerRegistry::new();
        let t = Instant::now();
        let a = addr("10.0.0.2", 8888);
        reg.touch(&a, t);
        for w in [Duration::from_nanos(1), Duration::from_secs(1), Duration::from_secs(3600)] {
            assert!(reg.snapshot_active(t, w).contains(&a));
        }
    }

    #[test]
    fn test_evicted_peer_never_in_snapshot() {
        let reg = PeerRegistry::new();
        let t = Instant::now();
        let a = addr("10.0.0.2", 8888);
        reg.touch(&a, t);
        assert!(reg.evict(&a));
        assert!(!reg.evict(&a));
        assert!(reg.snapshot_active(t, Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn test_snapshot_window_is_exclusive() {
        let reg = PeerRegistry::new();
        let t0 = Instant::now();
        let a = addr("10.0.0.2", 8888);
        reg.touch(&a, t0);
        let w = Duration::from_secs(30);
        assert_eq!(reg.snapshot_active(t0 + Duration::from_secs(29), w), vec![a.clone()]);
        assert!(reg.snapshot_active(t0 + w, w).is_empty());
        // Still known, just not eligible
        assert!(reg.contains(&a));
    }

    #[test]
    fn test_evict_stale_removes_exactly_old_entries() {
        let reg = PeerRegistry::new();
        let t0 = Instant::now();
        let old = addr("10.0.0.2", 1);
        let edge = addr("10.0.0.3", 1);
        let fresh = addr("10.0.0.4", 1);
        reg.touch(&old, t0);
        reg.touch(&edge, t0 + Duration::from_secs(10));
        reg.touch(&fresh, t0 + Duration::from_secs(200));

        let now = t0 + Duration::from_secs(310);
        let stale_after = Duration::from_secs(300);
        assert_eq!(reg.evict_stale(now, stale_after), 1);
        assert!(!reg.contains(&old));
        // Exactly at the limit is kept (strictly greater is evicted)
        assert!(reg.contains(&edge));
        assert!(reg.contains(&fresh));
        assert_eq!(reg.last_seen(&fresh), Some(t0 + Duration::from_secs(200)));

        assert_eq!(reg.evict_stale(now, stale_after), 0);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_older_touch_does_not_roll_back() {
        let reg = PeerRegistry::new();
        let t0 = Instant::now();
        let a = addr("10.0.0.2", 8888);
        reg.touch(&a, t0 + Duration::from_secs(5));
        reg.touch(&a, t0);
        assert_eq!(reg.last_seen(&a), Some(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_concurrent_touches_keep_one_entry_with_latest_time() {
        let reg = Arc::new(PeerRegistry::new());
        let t0 = Instant::now();
        let a = addr("10.0.0.2", 8888);
        let n = 16u64;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let reg = reg.clone();
                let a = a.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        reg.touch(&a, t0 + Duration::from_millis(i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.last_seen(&a), Some(t0 + Duration::from_millis(n - 1)));
    }

    #[test]
    fn test_active_with_age_sorted_freshest_first() {
        let reg = PeerRegistry::new();
        let t0 = Instant::now();
        reg.touch(&addr("10.0.0.2", 1), t0);
        reg.touch(&addr("10.0.0.3", 1), t0 + Duration::from_secs(20));
        reg.touch(&addr("10.0.0.4", 1), t0 + Duration::from_secs(40));

        let now = t0 + Duration::from_secs(70);
        let active = reg.active_with_age(now, Duration::from_secs(60));
        assert_eq!(active.len(), 2);
        assert_eq!(active[0], (addr("10.0.0.4", 1), Duration::from_secs(30)));
        assert_eq!(active[1], (addr("10.0.0.3", 1), Duration::from_secs(50)));
        assert_eq!(reg.count_active(now, Duration::from_secs(60)), 2);
    }
}
