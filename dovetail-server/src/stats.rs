//! Daemon counters exported through the monitoring listener.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters shared by every request handler.
#[derive(Debug, Default)]
pub struct Stats {
    pub dns_queries: AtomicU64,
    pub dns_servfail: AtomicU64,
    pub dns_dropped: AtomicU64,
    pub http_requests: AtomicU64,
    pub http_errors: AtomicU64,
}

/// A point-in-time copy of the counters, for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub dns_queries: u64,
    pub dns_servfail: u64,
    pub dns_dropped: u64,
    pub http_requests: u64,
    pub http_errors: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dns_queries: self.dns_queries.load(Ordering::Relaxed),
            dns_servfail: self.dns_servfail.load(Ordering::Relaxed),
            dns_dropped: self.dns_dropped.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
        }
    }
}
