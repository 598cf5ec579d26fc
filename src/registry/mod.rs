pub mod peers;

pub use peers::PeerRegistry;

use std::time::Duration;

use crate::constants;

/// Display classification of a peer by time since last sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Seen within the last few seconds.
    Active,
    /// Seen within the delivery window.
    Recent,
    /// Known, but quiet for a while.
    Idle,
}

impl Freshness {
    pub fn classify(age: Duration, delivery_window: Duration) -> Self {
        if age < Duration::from_secs(constants::FRESH_PEER_SECS) {
            Self::Active
        } else if age < delivery_window {
            Self::Recent
        } else {
            Self::Idle
        }
    }
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Recent => write!(f, "recent"),
            Self::Idle => write!(f, "idle"),
        }
    }
}
