// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus telemetry counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by the bus (relaxed ordering).
#[derive(Debug)]
pub struct BusMetrics {
    pub messages_sent: AtomicU64,
    /// Receiver invocations, one per (message, receiver) pair.
    pub deliveries: AtomicU64,
    /// Sends that found no receivers and were recycled immediately.
    pub messages_unrouted: AtomicU64,
    pub messages_recycled: AtomicU64,
    pub receiver_panics: AtomicU64,
    pub batches: AtomicU64,
    pub mutations_applied: AtomicU64,
    /// Times the in-flight letter count reached the warn threshold.
    pub in_flight_warnings: AtomicU64,
}

impl BusMetrics {
    #[inline]
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            messages_unrouted: AtomicU64::new(0),
            messages_recycled: AtomicU64::new(0),
            receiver_panics: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            mutations_applied: AtomicU64::new(0),
            in_flight_warnings: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            messages_unrouted: self.messages_unrouted.load(Ordering::Relaxed),
            messages_recycled: self.messages_recycled.load(Ordering::Relaxed),
            receiver_panics: self.receiver_panics.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            mutations_applied: self.mutations_applied.load(Ordering::Relaxed),
            in_flight_warnings: self.in_flight_warnings.load(Ordering::Relaxed),
            pool_hits: 0,
            pool_misses: 0,
        }
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BusMetrics`] plus pool hit/miss counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub messages_unrouted: u64,
    pub messages_recycled: u64,
    pub receiver_panics: u64,
    pub batches: u64,
    pub mutations_applied: u64,
    pub in_flight_warnings: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_zeroed() {
        assert_eq!(BusMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_bump() {
        let metrics = BusMetrics::new();
        BusMetrics::bump(&metrics.deliveries, 3);
        BusMetrics::bump(&metrics.messages_sent, 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.deliveries, 3);
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.receiver_panics, 0);
    }
}
