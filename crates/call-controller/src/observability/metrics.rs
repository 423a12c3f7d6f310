//! Gateway metrics for observability.
//!
//! Atomic counters back the `/stats` snapshot and are mirrored to the
//! `metrics` facade (rendered by the Prometheus exporter installed in
//! `main`). All metrics are emitted with the `cc_` prefix.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Point-in-time metric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Currently admitted connections.
    pub connections: usize,
    /// Sessions currently in the registry.
    pub sessions: usize,
    /// Sessions opened since startup.
    pub sessions_opened: u64,
    /// Sessions force-closed by the reaper since startup.
    pub sessions_reaped: u64,
    /// Signaling frames relayed since startup.
    pub events_relayed: u64,
}

/// Shared metrics updated by the registry actor and read by observers.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    connections: AtomicUsize,
    sessions: AtomicUsize,
    sessions_opened: AtomicU64,
    sessions_reaped: AtomicU64,
    events_relayed: AtomicU64,
}

impl GatewayMetrics {
    /// Create shared metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connection was admitted by the gateway.
    pub fn connection_admitted(&self) {
        let now = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("cc_connections").set(now as f64);
    }

    /// An admitted connection closed.
    pub fn connection_closed(&self) {
        let now = self.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!("cc_connections").set(now as f64);
    }

    /// A session entered the registry.
    pub fn session_opened(&self) {
        let now = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        gauge!("cc_active_sessions").set(now as f64);
        counter!("cc_sessions_opened_total").increment(1);
    }

    /// A session left the registry (finalized or reaped).
    pub fn session_closed(&self) {
        let now = self.sessions.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!("cc_active_sessions").set(now as f64);
    }

    /// Sessions force-closed by an idle sweep.
    pub fn sessions_reaped(&self, count: u64) {
        self.sessions_reaped.fetch_add(count, Ordering::Relaxed);
        counter!("cc_sessions_reaped_total").increment(count);
    }

    /// A signaling frame was relayed to `fanout` recipients.
    pub fn events_relayed(&self, fanout: u64) {
        self.events_relayed.fetch_add(fanout, Ordering::Relaxed);
        counter!("cc_events_relayed_total").increment(fanout);
    }

    /// Read current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
            events_relayed: self.events_relayed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counts_track_admission_and_close() {
        let metrics = GatewayMetrics::new();

        metrics.connection_admitted();
        metrics.connection_admitted();
        assert_eq!(metrics.snapshot().connections, 2);

        metrics.connection_closed();
        assert_eq!(metrics.snapshot().connections, 1);
    }

    #[test]
    fn test_session_gauge_and_lifetime_counter() {
        let metrics = GatewayMetrics::new();

        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions, 1);
        assert_eq!(snapshot.sessions_opened, 2);
    }

    #[test]
    fn test_reap_and_relay_counters_accumulate() {
        let metrics = GatewayMetrics::new();

        metrics.sessions_reaped(3);
        metrics.events_relayed(1);
        metrics.events_relayed(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_reaped, 3);
        assert_eq!(snapshot.events_relayed, 3);
    }
}
