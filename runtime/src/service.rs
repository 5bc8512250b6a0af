//! Reservation service: the engine's entry point.
//!
//! Wires the allocator, the admission gate, the degradation controller, the
//! reconciler and the availability cache over one ledger and one fast gate,
//! and routes each request by the controller's current state.

use crate::admission::{AdmissionGate, AdmissionSettings};
use crate::allocator::OptimisticAllocator;
use crate::cache::{CacheStats, ItemCache};
use crate::commit::DurableCommit;
use crate::config::EngineConfig;
use crate::degradation::{DegradationController, GateMode};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::reconciler::Reconciler;
use crate::shutdown::ShutdownCoordinator;
use seatgate_core::environment::{Clock, SystemClock};
use seatgate_core::gate::FastGate;
use seatgate_core::inventory::{InventoryItem, ItemId, Quantity, RequesterId};
use seatgate_core::ledger::LedgerStore;
use seatgate_core::outcome::{AllocationError, ReserveOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::Instant;

/// How a request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Follow the degradation controller.
    #[default]
    Auto,
    /// Always use the admission gate.
    Gate,
    /// Always use the optimistic allocator.
    Optimistic,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Gate => "gate",
            Self::Optimistic => "optimistic",
        })
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gate" => Ok(Self::Gate),
            "optimistic" => Ok(Self::Optimistic),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Allocation engine over one ledger and one fast gate.
pub struct ReservationService {
    ledger: Arc<dyn LedgerStore>,
    gate: Arc<dyn FastGate>,
    config: EngineConfig,
    allocator: Arc<OptimisticAllocator>,
    admission: AdmissionGate,
    controller: Arc<DegradationController>,
    cache: Arc<ItemCache>,
    metrics: Arc<EngineMetrics>,
}

impl ReservationService {
    /// Create a service stamping reservations with the system clock.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gate: Arc<dyn FastGate>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(ledger, gate, config, Arc::new(SystemClock))
    }

    /// Create a service with an explicit clock.
    #[must_use]
    pub fn with_clock(
        ledger: Arc<dyn LedgerStore>,
        gate: Arc<dyn FastGate>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let cache = Arc::new(ItemCache::new(config.cache));
        let commit = DurableCommit::new(
            Arc::clone(&ledger),
            Arc::clone(&metrics),
            Arc::clone(&cache),
        );
        let allocator = Arc::new(OptimisticAllocator::new(
            commit.clone(),
            config.retry,
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        let controller = Arc::new(DegradationController::new(
            config.degradation,
            Arc::clone(&metrics),
        ));
        let admission = AdmissionGate::new(
            Arc::clone(&gate),
            commit,
            Arc::clone(&allocator),
            Arc::clone(&controller),
            AdmissionSettings {
                provisional_ttl: config.provisional_ttl,
                gate_timeout: config.gate_timeout,
                fallback_on_gate_error: config.fallback_on_gate_error,
            },
            clock,
            Arc::clone(&metrics),
        );

        Self {
            ledger,
            gate,
            config,
            allocator,
            admission,
            controller,
            cache,
            metrics,
        }
    }

    /// Reserve seats, routed by the degradation controller.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError`] when the item does not exist or the ledger
    /// fails.
    pub async fn reserve(
        &self,
        item: ItemId,
        requester: RequesterId,
        quantity: Quantity,
    ) -> Result<ReserveOutcome, AllocationError> {
        self.reserve_with(Strategy::Auto, item, requester, quantity)
            .await
    }

    /// Reserve seats with an explicit routing strategy.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError`] when the item does not exist or the ledger
    /// fails.
    pub async fn reserve_with(
        &self,
        strategy: Strategy,
        item: ItemId,
        requester: RequesterId,
        quantity: Quantity,
    ) -> Result<ReserveOutcome, AllocationError> {
        self.metrics.record_request();
        let started = Instant::now();

        let use_gate = match strategy {
            Strategy::Gate => true,
            Strategy::Optimistic => false,
            Strategy::Auto => self.controller.mode().await == GateMode::Active,
        };
        let result = if use_gate {
            self.admission.reserve(item, requester, quantity).await
        } else {
            self.allocator.allocate(item, requester, quantity).await
        };

        self.metrics.record_reserve_duration(started.elapsed());
        result
    }

    /// Display availability, served through the read-through cache.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError`] when the item does not exist or the ledger
    /// fails.
    pub async fn availability(&self, item: ItemId) -> Result<InventoryItem, AllocationError> {
        let item = self
            .cache
            .read_through(item, || self.ledger.read_item(item))
            .await?;
        Ok(item)
    }

    /// Create an item in the ledger and prime its gate counter.
    ///
    /// A failed prime is not an error; the reconciler will prime it.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Store`] when the ledger rejects the item.
    pub async fn create_item(
        &self,
        name: &str,
        total_capacity: u32,
    ) -> Result<InventoryItem, AllocationError> {
        let item = self
            .ledger
            .create_item(name.to_string(), total_capacity)
            .await?;

        let primed = tokio::time::timeout(
            self.config.gate_timeout,
            self.gate.set_capacity(item.id, item.remaining),
        )
        .await;
        if !matches!(primed, Ok(Ok(()))) {
            tracing::warn!(item_id = %item.id, "Could not prime gate for new item");
        }

        tracing::info!(item_id = %item.id, capacity = total_capacity, "Inventory item created");
        Ok(item)
    }

    /// A reconciler over this service's ledger and gate.
    #[must_use]
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.gate),
            self.config.reconcile_interval,
            self.config.gate_timeout,
            Arc::clone(&self.metrics),
        )
    }

    /// Spawn the reconciler and the recovery prober under `coordinator`.
    pub fn start_background(&self, coordinator: &mut ShutdownCoordinator) {
        let reconciler = self.reconciler().spawn(coordinator.subscribe());
        coordinator.register("reconciler", reconciler);

        let prober = Arc::clone(&self.controller).spawn_prober(
            Arc::clone(&self.gate),
            self.config.gate_timeout,
            coordinator.subscribe(),
        );
        coordinator.register("gate-prober", prober);
    }

    /// Current routing state.
    pub async fn mode(&self) -> GateMode {
        self.controller.mode().await
    }

    /// The degradation controller.
    #[must_use]
    pub const fn controller(&self) -> &Arc<DegradationController> {
        &self.controller
    }

    /// Engine counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Availability cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The configuration the service was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }
}
