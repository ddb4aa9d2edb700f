//! Observability and Metrics
//!
//! Counters for connections, handshakes, pairings and relayed messages.
//!
//! Uses atomic counters for thread-safe metrics collection. Connection workers
//! record into the process-wide instance returned by [`global_metrics`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

use crate::error::ProtocolError;

/// Global metrics collector for relay operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Failed handshakes
    pub handshakes_failed: AtomicU64,
    /// Pairing requests seen by the server
    pub pairing_requests: AtomicU64,
    /// Pairings confirmed by both sides
    pub pairings_established: AtomicU64,
    /// Pairing attempts answered with a failure
    pub pairings_failed: AtomicU64,
    /// Messages handed to a peer
    pub messages_relayed: AtomicU64,
    /// Messages refused for lack of a peer
    pub relay_no_peer: AtomicU64,
    /// Messages refused for exhausted quota
    pub relay_quota_exceeded: AtomicU64,
    /// Messages whose peer had gone away
    pub relay_peer_unreachable: AtomicU64,
    /// Envelopes that failed to parse or classify
    pub malformed_envelopes: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            pairing_requests: AtomicU64::new(0),
            pairings_established: AtomicU64::new(0),
            pairings_failed: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            relay_no_peer: AtomicU64::new(0),
            relay_quota_exceeded: AtomicU64::new(0),
            relay_peer_unreachable: AtomicU64::new(0),
            malformed_envelopes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pairing_requested(&self) {
        self.pairing_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pairing_established(&self) {
        self.pairings_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pairing_failed(&self) {
        self.pairings_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_envelope(&self) {
        self.malformed_envelopes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused relay under the counter matching its cause
    pub fn relay_refused(&self, err: &ProtocolError) {
        let counter = match err {
            ProtocolError::NoPeer => &self.relay_no_peer,
            ProtocolError::QuotaExceeded(_) => &self.relay_quota_exceeded,
            ProtocolError::PeerUnreachable(_) => &self.relay_peer_unreachable,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            pairing_requests: self.pairing_requests.load(Ordering::Relaxed),
            pairings_established: self.pairings_established.load(Ordering::Relaxed),
            pairings_failed: self.pairings_failed.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            relay_no_peer: self.relay_no_peer.load(Ordering::Relaxed),
            relay_quota_exceeded: self.relay_quota_exceeded.load(Ordering::Relaxed),
            relay_peer_unreachable: self.relay_peer_unreachable.load(Ordering::Relaxed),
            malformed_envelopes: self.malformed_envelopes.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            pairing_requests = snapshot.pairing_requests,
            pairings_established = snapshot.pairings_established,
            pairings_failed = snapshot.pairings_failed,
            messages_relayed = snapshot.messages_relayed,
            relay_no_peer = snapshot.relay_no_peer,
            relay_quota_exceeded = snapshot.relay_quota_exceeded,
            relay_peer_unreachable = snapshot.relay_peer_unreachable,
            malformed_envelopes = snapshot.malformed_envelopes,
            uptime_seconds = snapshot.uptime_seconds,
            "Relay metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub pairing_requests: u64,
    pub pairings_established: u64,
    pub pairings_failed: u64,
    pub messages_relayed: u64,
    pub relay_no_peer: u64,
    pub relay_quota_exceeded: u64,
    pub relay_peer_unreachable: u64,
    pub malformed_envelopes: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
