//! Maintenance loop: stale-peer eviction and a periodic status line.
//!
//! Runs on its own thread until shutdown. Waits go through the shutdown
//! signal, so stopping never waits out an interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PeerPolicy;
use crate::message_log::MessageLog;
use crate::registry::PeerRegistry;
use crate::shutdown::ShutdownSignal;

/// Evict peers idle past the stale window. Returns count removed.
pub fn cleanup_stale_peers(registry: &PeerRegistry, policy: &PeerPolicy, now: Instant) -> usize {
    let removed = registry.evict_stale(now, policy.stale_after());
    if removed > 0 {
        tracing::info!(removed, remaining = registry.len(), "Evicted stale peers");
    } else {
        tracing::debug!("No stale peers");
    }
    removed
}

pub fn run_maintenance_loop(
    registry: Arc<PeerRegistry>,
    log: Arc<MessageLog>,
    policy: PeerPolicy,
    shutdown: ShutdownSignal,
) {
    let cleanup_every = Duration::from_secs(policy.cleanup_interval_secs.max(1));
    let status_every = Duration::from_secs(policy.status_interval_secs.max(1));
    let tick = cleanup_every.min(status_every);

    let mut last_cleanup = Instant::now();
    let mut last_status = Instant::now();

    tracing::info!(
        cleanup_secs = cleanup_every.as_secs(),
        status_secs = status_every.as_secs(),
        stale_after_secs = policy.stale_after_secs,
        "Maintenance loop started"
    );

    while shutdown.wait(tick) {
        let now = Instant::now();

        if now.duration_since(last_cleanup) >= cleanup_every {
            cleanup_stale_peers(&registry, &policy, now);
            last_cleanup = now;
        }

        if now.duration_since(last_status) >= status_every {
            tracing::info!(
                known = registry.len(),
                active = registry.count_active(now, policy.active_window()),
                messages = log.len(),
                "Periodic status: running"
            );
            last_status = now;
        }
    }

    tracing::info!("Maintenance loop stopped");
}
