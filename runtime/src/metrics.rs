//! Engine metrics.
//!
//! Every counter is recorded twice: into an in-process [`EngineMetrics`]
//! (atomics, snapshotted by tests and reports) and through the `metrics`
//! facade, which [`MetricsServer`] exports in Prometheus format. Without an
//! installed recorder the facade calls are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatgate_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use seatgate_core::outcome::RejectReason;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics exporter.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address reported for scraping (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g., by another test) is not an
    /// error; the server then has no handle and [`Self::render`] returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("seatgate_requests_total", "Reservation requests received");
    describe_counter!(
        "seatgate_allocation_attempts_total",
        "Optimistic read-check-write attempts"
    );
    describe_counter!(
        "seatgate_reservations_confirmed_total",
        "Reservations durably committed"
    );
    describe_counter!(
        "seatgate_version_conflicts_total",
        "Conditional writes that lost a version race"
    );
    describe_counter!(
        "seatgate_rejections_total",
        "Rejected reservations, labelled by reason"
    );
    describe_counter!(
        "seatgate_fast_rejections_total",
        "Rejections decided by the fast gate without touching the ledger"
    );
    describe_counter!("seatgate_ledger_reads_total", "Ledger item reads");
    describe_counter!(
        "seatgate_ledger_writes_total",
        "Ledger conditional write attempts"
    );
    describe_counter!(
        "seatgate_store_failures_total",
        "Ledger calls that failed with a store error"
    );
    describe_counter!("seatgate_gate_errors_total", "Failed or timed-out fast gate calls");
    describe_counter!(
        "seatgate_gate_fallbacks_total",
        "Requests served by the optimistic allocator after a gate miss"
    );
    describe_counter!(
        "seatgate_provisional_releases_total",
        "Provisional holds released without a commit"
    );
    describe_counter!(
        "seatgate_provisional_folds_total",
        "Provisional holds folded into capacity after a commit"
    );
    describe_counter!(
        "seatgate_hold_settle_failures_total",
        "Release or fold calls that failed; the hold expires by TTL"
    );
    describe_counter!(
        "seatgate_gate_transitions_total",
        "Degradation state transitions, labelled by target state"
    );
    describe_counter!("seatgate_reconcile_runs_total", "Reconciler passes");
    describe_counter!(
        "seatgate_reconcile_failures_total",
        "Reconciler passes or items that failed"
    );
    describe_gauge!(
        "seatgate_gate_bypassed",
        "Whether the fast gate is bypassed (0=active, 1=bypassed)"
    );
    describe_histogram!(
        "seatgate_reserve_duration_seconds",
        "End-to-end reservation latency"
    );
    describe_histogram!(
        "seatgate_gate_call_duration_seconds",
        "Fast gate admission call latency"
    );
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Reservation requests received
    pub requests: u64,
    /// Optimistic allocator attempts
    pub attempts: u64,
    /// Reservations committed
    pub confirmed: u64,
    /// Conditional writes lost to a concurrent writer
    pub version_conflicts: u64,
    /// `SoldOut` rejections
    pub rejected_sold_out: u64,
    /// `Contention` rejections
    pub rejected_contention: u64,
    /// `GateUnavailable` rejections
    pub rejected_gate_unavailable: u64,
    /// Rejections decided in Phase 1
    pub fast_rejections: u64,
    /// Ledger reads
    pub ledger_reads: u64,
    /// Ledger write attempts
    pub ledger_writes: u64,
    /// Ledger store failures
    pub store_failures: u64,
    /// Fast gate errors and timeouts
    pub gate_errors: u64,
    /// Requests that fell back to the optimistic allocator
    pub gate_fallbacks: u64,
    /// Holds released
    pub provisional_releases: u64,
    /// Holds folded
    pub provisional_folds: u64,
    /// Holds whose settle call failed
    pub hold_settle_failures: u64,
    /// Transitions into the bypassed state
    pub bypass_transitions: u64,
    /// Transitions back into the active state
    pub recover_transitions: u64,
    /// Reconciler passes
    pub reconcile_runs: u64,
    /// Reconciler failures (pass or item)
    pub reconcile_failures: u64,
}

impl MetricsSnapshot {
    /// Ledger writes per request. Zero when no request was seen.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // counters stay far below 2^52
    pub fn load_amplification(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.ledger_writes as f64 / self.requests as f64
    }

    /// Total rejections of any reason.
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.rejected_sold_out + self.rejected_contention + self.rejected_gate_unavailable
    }
}

/// Shared engine counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    requests: AtomicU64,
    attempts: AtomicU64,
    confirmed: AtomicU64,
    version_conflicts: AtomicU64,
    rejected_sold_out: AtomicU64,
    rejected_contention: AtomicU64,
    rejected_gate_unavailable: AtomicU64,
    fast_rejections: AtomicU64,
    ledger_reads: AtomicU64,
    ledger_writes: AtomicU64,
    store_failures: AtomicU64,
    gate_errors: AtomicU64,
    gate_fallbacks: AtomicU64,
    provisional_releases: AtomicU64,
    provisional_folds: AtomicU64,
    hold_settle_failures: AtomicU64,
    bypass_transitions: AtomicU64,
    recover_transitions: AtomicU64,
    reconcile_runs: AtomicU64,
    reconcile_failures: AtomicU64,
}

fn bump(cell: &AtomicU64) {
    cell.fetch_add(1, Ordering::Relaxed);
}

impl EngineMetrics {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A reservation request entered the engine.
    pub fn record_request(&self) {
        bump(&self.requests);
        counter!("seatgate_requests_total").increment(1);
    }

    /// End-to-end latency of one request.
    pub fn record_reserve_duration(&self, duration: Duration) {
        histogram!("seatgate_reserve_duration_seconds").record(duration.as_secs_f64());
    }

    /// One optimistic read-check-write iteration started.
    pub fn record_attempt(&self) {
        bump(&self.attempts);
        counter!("seatgate_allocation_attempts_total").increment(1);
    }

    /// A ledger item read was issued.
    pub fn record_ledger_read(&self) {
        bump(&self.ledger_reads);
        counter!("seatgate_ledger_reads_total").increment(1);
    }

    /// A ledger conditional write was issued.
    pub fn record_ledger_write(&self) {
        bump(&self.ledger_writes);
        counter!("seatgate_ledger_writes_total").increment(1);
    }

    /// A conditional write affected zero rows.
    pub fn record_version_conflict(&self) {
        bump(&self.version_conflicts);
        counter!("seatgate_version_conflicts_total").increment(1);
    }

    /// A ledger call failed.
    pub fn record_store_failure(&self) {
        bump(&self.store_failures);
        counter!("seatgate_store_failures_total").increment(1);
    }

    /// A reservation was committed.
    pub fn record_confirmed(&self) {
        bump(&self.confirmed);
        counter!("seatgate_reservations_confirmed_total").increment(1);
    }

    /// A reservation was rejected.
    pub fn record_rejection(&self, reason: RejectReason) {
        let cell = match reason {
            RejectReason::SoldOut => &self.rejected_sold_out,
            RejectReason::Contention => &self.rejected_contention,
            RejectReason::GateUnavailable => &self.rejected_gate_unavailable,
        };
        bump(cell);
        counter!("seatgate_rejections_total", "reason" => reason.as_str()).increment(1);
    }

    /// Phase 1 rejected without touching the ledger.
    pub fn record_fast_rejection(&self) {
        bump(&self.fast_rejections);
        counter!("seatgate_fast_rejections_total").increment(1);
    }

    /// A fast gate admission call completed (successfully or not).
    pub fn record_gate_call(&self, duration: Duration) {
        histogram!("seatgate_gate_call_duration_seconds").record(duration.as_secs_f64());
    }

    /// A fast gate call failed or timed out.
    pub fn record_gate_error(&self) {
        bump(&self.gate_errors);
        counter!("seatgate_gate_errors_total").increment(1);
    }

    /// A gated request was handed to the optimistic allocator.
    pub fn record_gate_fallback(&self) {
        bump(&self.gate_fallbacks);
        counter!("seatgate_gate_fallbacks_total").increment(1);
    }

    /// A provisional hold was released.
    pub fn record_provisional_release(&self) {
        bump(&self.provisional_releases);
        counter!("seatgate_provisional_releases_total").increment(1);
    }

    /// A provisional hold was folded into capacity.
    pub fn record_provisional_fold(&self) {
        bump(&self.provisional_folds);
        counter!("seatgate_provisional_folds_total").increment(1);
    }

    /// Releasing or folding a hold failed.
    pub fn record_hold_settle_failure(&self) {
        bump(&self.hold_settle_failures);
        counter!("seatgate_hold_settle_failures_total").increment(1);
    }

    /// The degradation controller changed state.
    pub fn record_gate_transition(&self, bypassed: bool) {
        if bypassed {
            bump(&self.bypass_transitions);
            counter!("seatgate_gate_transitions_total", "to" => "gate_bypassed").increment(1);
            gauge!("seatgate_gate_bypassed").set(1.0);
        } else {
            bump(&self.recover_transitions);
            counter!("seatgate_gate_transitions_total", "to" => "gate_active").increment(1);
            gauge!("seatgate_gate_bypassed").set(0.0);
        }
    }

    /// A reconciler pass ran.
    pub fn record_reconcile_run(&self) {
        bump(&self.reconcile_runs);
        counter!("seatgate_reconcile_runs_total").increment(1);
    }

    /// A reconciler pass or item failed.
    pub fn record_reconcile_failure(&self) {
        bump(&self.reconcile_failures);
        counter!("seatgate_reconcile_failures_total").increment(1);
    }

    /// Copy all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |cell: &AtomicU64| cell.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: load(&self.requests),
            attempts: load(&self.attempts),
            confirmed: load(&self.confirmed),
            version_conflicts: load(&self.version_conflicts),
            rejected_sold_out: load(&self.rejected_sold_out),
            rejected_contention: load(&self.rejected_contention),
            rejected_gate_unavailable: load(&self.rejected_gate_unavailable),
            fast_rejections: load(&self.fast_rejections),
            ledger_reads: load(&self.ledger_reads),
            ledger_writes: load(&self.ledger_writes),
            store_failures: load(&self.store_failures),
            gate_errors: load(&self.gate_errors),
            gate_fallbacks: load(&self.gate_fallbacks),
            provisional_releases: load(&self.provisional_releases),
            provisional_folds: load(&self.provisional_folds),
            hold_settle_failures: load(&self.hold_settle_failures),
            bypass_transitions: load(&self.bypass_transitions),
            recover_transitions: load(&self.recover_transitions),
            reconcile_runs: load(&self.reconcile_runs),
            reconcile_failures: load(&self.reconcile_failures),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_ledger_write();
        metrics.record_ledger_write();
        metrics.record_ledger_write();
        metrics.record_rejection(RejectReason::SoldOut);
        metrics.record_rejection(RejectReason::Contention);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.rejected(), 2);
        assert!((snapshot.load_amplification() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn amplification_is_zero_without_requests() {
        assert!(MetricsSnapshot::default().load_amplification().abs() < f64::EPSILON);
    }

    #[test]
    fn transitions_are_split_by_direction() {
        let metrics = EngineMetrics::new();
        metrics.record_gate_transition(true);
        metrics.record_gate_transition(false);
        metrics.record_gate_transition(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bypass_transitions, 2);
        assert_eq!(snapshot.recover_transitions, 1);
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        let metrics = EngineMetrics::new();
        metrics.record_request();
        metrics.record_confirmed();

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("seatgate_requests_total"));
            assert!(rendered.contains("seatgate_reservations_confirmed_total"));
        }
    }
}
