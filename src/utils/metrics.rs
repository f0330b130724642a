//! Observability and Metrics
//!
//! This module provides metrics collection for the interception engine: connection
//! lifecycle, per-message outcomes, synthetic traffic and listener health.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for engine operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections injected
    pub connections_total: AtomicU64,
    /// Currently injected connections
    pub connections_active: AtomicU64,
    /// Messages that went through a dispatch pass
    pub packets_intercepted: AtomicU64,
    /// Messages forwarded untouched (unknown type, no schema, interception off)
    pub packets_passthrough: AtomicU64,
    /// Messages dropped because a listener cancelled them
    pub packets_cancelled: AtomicU64,
    /// Messages handed to the next pipeline stage
    pub packets_forwarded: AtomicU64,
    /// Synthetic messages queued for dispatch
    pub synthetic_sent: AtomicU64,
    /// Synthetic messages queued with interception bypass
    pub synthetic_bypassed: AtomicU64,
    /// Queued synthetic messages discarded at connection termination
    pub synthetic_discarded: AtomicU64,
    /// Listener invocations
    pub listener_invocations: AtomicU64,
    /// Listener invocations that returned an error or panicked
    pub listener_failures: AtomicU64,
    /// Listeners removed after too many consecutive failures
    pub listeners_auto_removed: AtomicU64,
    /// Dispatch passes abandoned by a bounded drain
    pub dispatches_abandoned: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_intercepted: AtomicU64::new(0),
            packets_passthrough: AtomicU64::new(0),
            packets_cancelled: AtomicU64::new(0),
            packets_forwarded: AtomicU64::new(0),
            synthetic_sent: AtomicU64::new(0),
            synthetic_bypassed: AtomicU64::new(0),
            synthetic_discarded: AtomicU64::new(0),
            listener_invocations: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            listeners_auto_removed: AtomicU64::new(0),
            dispatches_abandoned: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new injected connection
    pub fn connection_injected(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection removed from the engine
    pub fn connection_removed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn packet_intercepted(&self) {
        self.packets_intercepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_passthrough(&self) {
        self.packets_passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_cancelled(&self) {
        self.packets_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synthetic send, with or without bypass
    pub fn synthetic_queued(&self, bypass: bool) {
        if bypass {
            self.synthetic_bypassed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.synthetic_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn synthetic_discarded(&self, count: u64) {
        self.synthetic_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn listener_invoked(&self) {
        self.listener_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_failed(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_auto_removed(&self) {
        self.listeners_auto_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatches_abandoned(&self, count: u64) {
        self.dispatches_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            packets_intercepted: self.packets_intercepted.load(Ordering::Relaxed),
            packets_passthrough: self.packets_passthrough.load(Ordering::Relaxed),
            packets_cancelled: self.packets_cancelled.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            synthetic_sent: self.synthetic_sent.load(Ordering::Relaxed),
            synthetic_bypassed: self.synthetic_bypassed.load(Ordering::Relaxed),
            synthetic_discarded: self.synthetic_discarded.load(Ordering::Relaxed),
            listener_invocations: self.listener_invocations.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            listeners_auto_removed: self.listeners_auto_removed.load(Ordering::Relaxed),
            dispatches_abandoned: self.dispatches_abandoned.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            packets_intercepted = snapshot.packets_intercepted,
            packets_passthrough = snapshot.packets_passthrough,
            packets_cancelled = snapshot.packets_cancelled,
            packets_forwarded = snapshot.packets_forwarded,
            synthetic_sent = snapshot.synthetic_sent,
            synthetic_bypassed = snapshot.synthetic_bypassed,
            synthetic_discarded = snapshot.synthetic_discarded,
            listener_invocations = snapshot.listener_invocations,
            listener_failures = snapshot.listener_failures,
            listeners_auto_removed = snapshot.listeners_auto_removed,
            dispatches_abandoned = snapshot.dispatches_abandoned,
            uptime_seconds = snapshot.uptime_seconds,
            "Interception metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub packets_intercepted: u64,
    pub packets_passthrough: u64,
    pub packets_cancelled: u64,
    pub packets_forwarded: u64,
    pub synthetic_sent: u64,
    pub synthetic_bypassed: u64,
    pub synthetic_discarded: u64,
    pub listener_invocations: u64,
    pub listener_failures: u64,
    pub listeners_auto_removed: u64,
    pub dispatches_abandoned: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Elapsed time so far
    pub fn elapsed_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
