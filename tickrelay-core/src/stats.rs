//! Relay-wide counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the acceptor and all workers
#[derive(Debug, Default)]
pub struct RelayStats {
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    batches_read: AtomicU64,
    batches_failed: AtomicU64,
    records_written: AtomicU64,
    lines_discarded: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_read(&self) {
        self.batches_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_written(&self, count: usize) {
        self.records_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn lines_discarded(&self, count: usize) {
        self.lines_discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            batches_read: self.batches_read.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            lines_discarded: self.lines_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub batches_read: u64,
    pub batches_failed: u64,
    pub records_written: u64,
    pub lines_discarded: u64,
}

impl StatsSnapshot {
    /// Connections currently being served
    pub fn active_connections(&self) -> u64 {
        self.connections_accepted.saturating_sub(self.connections_closed)
    }
}
