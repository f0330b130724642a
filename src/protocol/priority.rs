//! Priority bands and cancellation policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse ordering rank of a listener.
///
/// Bands run in ascending rank: `Lowest` sees a packet first and `Monitor` last. A listener
/// in a later band therefore observes every mutation made by earlier bands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ListenerPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    /// Observe-only band; the packet is read-only while it runs
    Monitor,
}

impl ListenerPriority {
    /// Every band in dispatch order
    pub const ALL: [ListenerPriority; 6] = [
        ListenerPriority::Lowest,
        ListenerPriority::Low,
        ListenerPriority::Normal,
        ListenerPriority::High,
        ListenerPriority::Highest,
        ListenerPriority::Monitor,
    ];

    /// Dispatch rank, 0 runs first
    #[inline]
    pub fn rank(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_monitor(self) -> bool {
        self == ListenerPriority::Monitor
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ListenerPriority::Lowest => "lowest",
            ListenerPriority::Low => "low",
            ListenerPriority::Normal => "normal",
            ListenerPriority::High => "high",
            ListenerPriority::Highest => "highest",
            ListenerPriority::Monitor => "monitor",
        }
    }
}

impl fmt::Display for ListenerPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a cancellation by a non-monitor listener does to the rest of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Skip remaining non-monitor listeners; monitors still run
    #[default]
    ShortCircuit,
    /// Keep delivering to every listener; later listeners may uncancel
    Propagate,
}
