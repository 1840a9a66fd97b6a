//! Statistics for the stream listener and registry

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the stream listener
#[derive(Debug, Default)]
pub struct ListenerStats {
    connections_accepted: AtomicU64,
    bytes_received: AtomicU64,
    records_parsed: AtomicU64,
    malformed_records: AtomicU64,
}

impl ListenerStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_connection(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_parsed(&self, n: usize) {
        self.records_parsed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self, n: u64) {
        self.malformed_records.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters
    pub fn snapshot(&self) -> ListenerStatsSnapshot {
        ListenerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            records_parsed: self.records_parsed.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
        }
    }
}

/// Copy of the listener counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStatsSnapshot {
    /// Connections accepted since start
    pub connections_accepted: u64,
    /// Bytes read from all connections
    pub bytes_received: u64,
    /// Records extracted
    pub records_parsed: u64,
    /// Records dropped as malformed
    pub malformed_records: u64,
}

/// Registry-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Distinct keys created by consumers (statistics keys excluded)
    pub keys: u64,
    /// Updates delivered to existing cells
    pub updates: u64,
    /// Updates dropped because no cell existed for the key
    pub dropped_updates: u64,
    /// Whether the stream listener is running
    pub listening: bool,
    /// Listener counters, if a listener was ever started
    pub listener: Option<ListenerStatsSnapshot>,
}
