//! Metrics collection for the control plane.
//!
//! Thread-safe counters; the kernel-side per-client traffic counters
//! live in the client map and are not duplicated here.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Global metrics registry for the daemon.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Frames read from the snooping device.
    pub snoop_frames: Counter,
    /// Frames rejected by structural validation.
    pub parse_rejects: Counter,
    /// DHCP ACKs that produced an address observation.
    pub dhcp_acks: Counter,
    /// DNS responses evaluated against the whitelist rules.
    pub dns_responses: Counter,
    /// Neighbor advertisements that produced an address observation.
    pub na_learned: Counter,
    /// Address observations pushed into the learning cache.
    pub addresses_learned: Counter,
    /// Clients created (explicitly or auto).
    pub clients_created: Counter,
    /// Clients removed (explicitly or idle-reaped).
    pub clients_removed: Counter,
    /// Whitelist GC sweeps executed.
    pub whitelist_gc_runs: Counter,
    /// Control socket requests served.
    pub control_requests: Counter,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_registry() {
        let registry = MetricsRegistry::new();
        registry.snoop_frames.inc();
        assert_eq!(registry.snoop_frames.get(), 1);
        assert_eq!(registry.parse_rejects.get(), 0);
    }
}
