//! Reconciler: keeps the fast gate's `capacity` counters honest.
//!
//! On every tick, each item's `capacity` is overwritten with the ledger's
//! `remaining`. Drift from failed folds, writes that bypass the engine, or a
//! gate that lost its data is corrected within one interval. `provisional`
//! is never touched; holds expire on their own TTL.

use crate::metrics::EngineMetrics;
use crate::shutdown::ShutdownListener;
use seatgate_core::gate::{FastGate, GateError};
use seatgate_core::inventory::ItemId;
use seatgate_core::ledger::{LedgerError, LedgerStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Summary of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Items read from the ledger
    pub items_seen: usize,
    /// Items whose capacity counter was written
    pub items_synced: usize,
    /// Items whose counter could not be written
    pub failures: Vec<(ItemId, GateError)>,
}

/// Periodic ledger-to-gate capacity sync.
pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    gate: Arc<dyn FastGate>,
    interval: Duration,
    call_timeout: Duration,
    metrics: Arc<EngineMetrics>,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gate: Arc<dyn FastGate>,
        interval: Duration,
        call_timeout: Duration,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            ledger,
            gate,
            interval,
            call_timeout,
            metrics,
        }
    }

    /// Run one pass over every item.
    ///
    /// Per-item gate failures are collected in the report and do not stop
    /// the pass.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the item list cannot be read.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, LedgerError> {
        self.metrics.record_reconcile_run();
        let items = self.ledger.list_items().await.inspect_err(|_| {
            self.metrics.record_reconcile_failure();
        })?;

        let mut report = ReconcileReport {
            items_seen: items.len(),
            ..ReconcileReport::default()
        };

        for item in items {
            let write = tokio::time::timeout(
                self.call_timeout,
                self.gate.set_capacity(item.id, item.remaining),
            )
            .await
            .unwrap_or(Err(GateError::Timeout(self.call_timeout)));

            match write {
                Ok(()) => {
                    debug!(item_id = %item.id, capacity = item.remaining, "Gate capacity synced");
                    report.items_synced += 1;
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Failed to sync gate capacity");
                    self.metrics.record_reconcile_failure();
                    report.failures.push((item.id, e));
                }
            }
        }

        Ok(report)
    }

    /// Run [`Self::reconcile_once`] every interval until shutdown.
    ///
    /// The first pass runs immediately, priming the gate at startup. A failed
    /// pass is logged and retried on the next tick.
    #[must_use]
    pub fn spawn(self, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.triggered() => break,
                    _ = ticker.tick() => {
                        match self.reconcile_once().await {
                            Ok(report) if report.failures.is_empty() => {
                                debug!(items = report.items_synced, "Reconcile pass complete");
                            }
                            Ok(report) => {
                                info!(
                                    synced = report.items_synced,
                                    failed = report.failures.len(),
                                    "Reconcile pass completed with failures"
                                );
                            }
                            Err(e) => {
                                warn!(error = %e, "Reconcile pass failed, retrying next tick");
                            }
                        }
                    }
                }
            }
            info!("Reconciler stopped");
        })
    }
}
