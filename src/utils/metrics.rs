//! Observability and Metrics
//!
//! Counters for session admission, logins and roster synchronisation.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for relay operations
#[derive(Debug)]
pub struct Metrics {
    /// Total sessions opened
    pub sessions_total: AtomicU64,
    /// Sessions currently holding an admission slot
    pub sessions_active: AtomicU64,
    /// Sessions turned away because no slot freed up in time
    pub sessions_rejected: AtomicU64,
    /// Public keys accepted
    pub logins_allowed: AtomicU64,
    /// Public keys denied
    pub logins_denied: AtomicU64,
    /// Completed roster refreshes
    pub roster_refreshes: AtomicU64,
    /// Keys in the roster after the last refresh
    pub roster_keys: AtomicU64,
    /// Workers that exited unsuccessfully or could not be spawned
    pub worker_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            sessions_total: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            logins_allowed: AtomicU64::new(0),
            logins_denied: AtomicU64::new(0),
            roster_refreshes: AtomicU64::new(0),
            roster_keys: AtomicU64::new(0),
            worker_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new session
    pub fn session_opened(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session acquiring a slot
    pub fn session_admitted(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session releasing its slot
    pub fn session_released(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a session rejected by admission
    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted login
    pub fn login_allowed(&self) {
        self.logins_allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a denied login
    pub fn login_denied(&self) {
        self.logins_denied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed roster refresh
    pub fn roster_refreshed(&self, keys: usize) {
        self.roster_refreshes.fetch_add(1, Ordering::Relaxed);
        self.roster_keys.store(keys as u64, Ordering::Relaxed);
    }

    /// Record a failed worker
    pub fn worker_failed(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            logins_allowed: self.logins_allowed.load(Ordering::Relaxed),
            logins_denied: self.logins_denied.load(Ordering::Relaxed),
            roster_refreshes: self.roster_refreshes.load(Ordering::Relaxed),
            roster_keys: self.roster_keys.load(Ordering::Relaxed),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_total = snapshot.sessions_total,
            sessions_active = snapshot.sessions_active,
            sessions_rejected = snapshot.sessions_rejected,
            logins_allowed = snapshot.logins_allowed,
            logins_denied = snapshot.logins_denied,
            roster_refreshes = snapshot.roster_refreshes,
            roster_keys = snapshot.roster_keys,
            worker_failures = snapshot.worker_failures,
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
    pub sessions_total: u64,
    pub sessions_active: u64,
    pub sessions_rejected: u64,
    pub logins_allowed: u64,
    pub logins_denied: u64,
    pub roster_refreshes: u64,
    pub roster_keys: u64,
    pub worker_failures: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
