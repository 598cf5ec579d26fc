//! Node configuration: network identity, timeouts and peer liveness policy.
//!
//! Stored as JSON. Every field has a default, so a partial file only
//! overrides what it names.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::{MessengerError, MessengerResult};

/// Peer liveness windows and maintenance cadence (all in seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerPolicy {
    /// Peers seen within this window are shown as active.
    pub active_window_secs: u64,
    /// Peers seen within this window are eligible for delivery.
    pub delivery_window_secs: u64,
    /// Peers not seen for longer than this are evicted by maintenance.
    pub stale_after_secs: u64,
    pub cleanup_interval_secs: u64,
    pub status_interval_secs: u64,
}

impl Default for PeerPolicy {
    fn default() -> Self {
        Self {
            active_window_secs: constants::ACTIVE_WINDOW_SECS,
            delivery_window_secs: constants::DELIVERY_WINDOW_SECS,
            stale_after_secs: constants::STALE_AFTER_SECS,
            cleanup_interval_secs: constants::CLEANUP_INTERVAL_SECS,
            status_interval_secs: constants::STATUS_INTERVAL_SECS,
        }
    }
}

impl PeerPolicy {
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn delivery_window(&self) -> Duration {
        Duration::from_secs(self.delivery_window_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub host: String,
    /// First port tried for the message listener.
    pub port: u16,
    pub discovery_port: u16,
    /// Consecutive ports tried when `port` is taken.
    pub port_attempts: u16,
    pub broadcast_interval_secs: u64,
    pub read_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub max_frame_bytes: usize,
    /// Upper bound on concurrent outbound deliveries per send.
    pub fanout_workers: usize,
    /// Consecutive delivery failures before a peer is evicted.
    pub evict_after_failures: u32,
    pub log_file: String,
    pub peers: PeerPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
            discovery_port: constants::DEFAULT_DISCOVERY_PORT,
            port_attempts: constants::PORT_BIND_ATTEMPTS,
            broadcast_interval_secs: constants::BROADCAST_INTERVAL_SECS,
            read_timeout_secs: constants::READ_TIMEOUT_SECS,
            send_timeout_secs: constants::SEND_TIMEOUT_SECS,
            max_frame_bytes: constants::MAX_FRAME_BYTES,
            fanout_workers: constants::FANOUT_WORKERS,
            evict_after_failures: constants::EVICT_AFTER_FAILURES,
            log_file: constants::DEFAULT_LOG_FILE.to_string(),
            peers: PeerPolicy::default(),
        }
    }
}

impl NodeConfig {
    /// Load config from `path`.
    ///
    /// A missing file is created with the defaults. An unreadable or invalid
    /// file is reported and the defaults are used.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            let config = Self::default();
            match config.save(path) {
                Ok(()) => tracing::info!(path = %path.display(), "Wrote default config"),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not write default config"
                ),
            }
            return config;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Config loaded");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Invalid config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                Self::default()
            }
        }
    }

    /// Save config as pretty JSON.
    pub fn save(&self, path: &Path) -> MessengerResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> MessengerResult<()> {
        if self.host.trim().is_empty() {
            return Err(MessengerError::Config("host must not be empty".into()));
        }
        if self.port_attempts == 0 {
            return Err(MessengerError::Config("port_attempts must be at least 1".into()));
        }
        if self.fanout_workers == 0 {
            return Err(MessengerError::Config("fanout_workers must be at least 1".into()));
        }
        if self.evict_after_failures == 0 {
            return Err(MessengerError::Config(
                "evict_after_failures must be at least 1".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(MessengerError::Config("max_frame_bytes must be at least 1".into()));
        }
        if self.broadcast_interval_secs == 0 {
            return Err(MessengerError::Config(
                "broadcast_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }
}
