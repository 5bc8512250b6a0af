//! Run summary: outcomes, latency percentiles and ledger load.

use seatgate_core::outcome::{AllocationError, RejectReason, ReserveOutcome};
use seatgate_runtime::metrics::MetricsSnapshot;
use seatgate_runtime::service::Strategy;
use std::fmt;
use std::time::Duration;

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (pct * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Outcome tally for one flash-sale run.
#[derive(Debug)]
pub struct Report {
    strategy: Strategy,
    capacity: u32,
    confirmed: u32,
    seats: u32,
    sold_out: u32,
    contention: u32,
    gate_unavailable: u32,
    errors: u32,
    latencies: Vec<Duration>,
    elapsed: Duration,
    remaining: Option<u32>,
    metrics: MetricsSnapshot,
}

impl Report {
    /// Start an empty report.
    #[must_use]
    pub fn new(strategy: Strategy, capacity: u32) -> Self {
        Self {
            strategy,
            capacity,
            confirmed: 0,
            seats: 0,
            sold_out: 0,
            contention: 0,
            gate_unavailable: 0,
            errors: 0,
            latencies: Vec::new(),
            elapsed: Duration::ZERO,
            remaining: None,
            metrics: MetricsSnapshot::default(),
        }
    }

    /// Count one request's result.
    pub fn record(&mut self, result: &Result<ReserveOutcome, AllocationError>, latency: Duration) {
        self.latencies.push(latency);
        match result {
            Ok(ReserveOutcome::Confirmed(reservation)) => {
                self.confirmed += 1;
                self.seats += reservation.quantity.get();
            }
            Ok(ReserveOutcome::Rejected(RejectReason::SoldOut)) => self.sold_out += 1,
            Ok(ReserveOutcome::Rejected(RejectReason::Contention)) => self.contention += 1,
            Ok(ReserveOutcome::Rejected(RejectReason::GateUnavailable)) => {
                self.gate_unavailable += 1;
            }
            Err(_) => self.errors += 1,
        }
    }

    /// Attach the run's wall time, final ledger state and engine counters.
    pub fn finish(&mut self, elapsed: Duration, remaining: Option<u32>, metrics: MetricsSnapshot) {
        self.elapsed = elapsed;
        self.remaining = remaining;
        self.metrics = metrics;
        self.latencies.sort_unstable();
    }

    /// Whether more seats were confirmed than exist.
    #[must_use]
    pub const fn overbooked(&self) -> bool {
        self.seats > self.capacity
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "flash sale: strategy={} capacity={}", self.strategy, self.capacity)?;
        writeln!(f, "  requests          {}", self.latencies.len())?;
        writeln!(f, "  confirmed         {} ({} seats)", self.confirmed, self.seats)?;
        writeln!(f, "  sold_out          {}", self.sold_out)?;
        writeln!(f, "  contention        {}", self.contention)?;
        writeln!(f, "  gate_unavailable  {}", self.gate_unavailable)?;
        writeln!(f, "  errors            {}", self.errors)?;
        if let Some(remaining) = self.remaining {
            writeln!(f, "  ledger remaining  {remaining}")?;
        }
        writeln!(f, "  ledger writes     {}", self.metrics.ledger_writes)?;
        writeln!(f, "  version conflicts {}", self.metrics.version_conflicts)?;
        writeln!(f, "  fast rejections   {}", self.metrics.fast_rejections)?;
        writeln!(
            f,
            "  writes/request    {:.3}",
            self.metrics.load_amplification()
        )?;
        writeln!(
            f,
            "  latency p50/p95/p99  {:?} / {:?} / {:?}",
            percentile(&self.latencies, 50),
            percentile(&self.latencies, 95),
            percentile(&self.latencies, 99)
        )?;
        write!(f, "  elapsed           {:?}", self.elapsed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use seatgate_core::inventory::{ItemId, Quantity, RequesterId, ReservationDraft};
    use seatgate_core::ledger::LedgerError;
    use seatgate_core::Utc;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let sorted = ms(&(1..=100).collect::<Vec<_>>());
        assert_eq!(percentile(&sorted, 50), Duration::from_millis(50));
        assert_eq!(percentile(&sorted, 95), Duration::from_millis(95));
        assert_eq!(percentile(&sorted, 99), Duration::from_millis(99));

        assert_eq!(percentile(&ms(&[7]), 99), Duration::from_millis(7));
        assert_eq!(percentile(&[], 50), Duration::ZERO);
    }

    #[test]
    fn tallies_outcomes_by_reason() {
        let mut report = Report::new(Strategy::Gate, 2);
        let reservation = ReservationDraft::new(
            RequesterId::new(1),
            ItemId::new(1),
            Quantity::new(2).unwrap(),
            Utc::now(),
        )
        .confirm();

        let latency = Duration::from_millis(1);
        report.record(&Ok(ReserveOutcome::Confirmed(reservation)), latency);
        report.record(&Ok(ReserveOutcome::Rejected(RejectReason::SoldOut)), latency);
        report.record(&Ok(ReserveOutcome::Rejected(RejectReason::Contention)), latency);
        report.record(
            &Err(AllocationError::Store(LedgerError::Unavailable("down".into()))),
            latency,
        );
        report.finish(Duration::from_millis(5), Some(0), MetricsSnapshot::default());

        assert_eq!(report.seats, 2);
        assert_eq!(report.sold_out, 1);
        assert_eq!(report.contention, 1);
        assert_eq!(report.errors, 1);
        assert!(!report.overbooked());
        assert!(report.to_string().contains("requests          4"));
    }
}
