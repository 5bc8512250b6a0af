//! # Seatgate Runtime
//!
//! The allocation engine: strategies for handing out a strictly bounded
//! inventory to many concurrent requesters without overbooking.
//!
//! ## Core Components
//!
//! - **Optimistic Allocator** ([`allocator`]): read, check, conditional write,
//!   bounded retry on version conflict
//! - **Admission Gate** ([`admission`]): Phase 1 check-and-hold in the fast gate,
//!   Phase 2 single durable commit, exactly-once release or fold of the hold
//! - **Reconciler** ([`reconciler`]): periodic ledger-to-gate capacity sync
//! - **Degradation Controller** ([`degradation`]): bypasses an unhealthy gate and
//!   restores it after a cooldown
//! - **Reservation Service** ([`service`]): wires it all and routes requests
//!
//! The ledger is the only source of truth. The fast gate filters load; it can
//! be stale, slow or gone without ever causing an overbooking.
//!
//! ## Example
//!
//! ```rust
//! use seatgate_core::inventory::{Quantity, RequesterId};
//! use seatgate_runtime::config::EngineConfig;
//! use seatgate_runtime::service::ReservationService;
//! use seatgate_testing::{InMemoryFastGate, InMemoryLedger};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ReservationService::new(
//!     Arc::new(InMemoryLedger::new()),
//!     Arc::new(InMemoryFastGate::new()),
//!     EngineConfig::default(),
//! );
//!
//! let item = service.create_item("Flash sale", 10).await?;
//! let outcome = service
//!     .reserve(item.id, RequesterId::new(1), Quantity::ONE)
//!     .await?;
//! assert!(outcome.is_confirmed());
//! # Ok(())
//! # }
//! ```

/// Two-phase admission gate
pub mod admission;

/// Optimistic compare-and-swap allocation
pub mod allocator;

/// Read-through availability cache
pub mod cache;

/// Durable commit shared by both strategies
pub mod commit;

/// Engine configuration
pub mod config;

/// Fast gate health tracking and bypass
pub mod degradation;

/// Prometheus metrics and in-process counters
pub mod metrics;

/// Ledger-to-gate capacity sync
pub mod reconciler;

/// Bounded retry policy for version conflicts
pub mod retry;

/// Request routing entry point
pub mod service;

/// Background task shutdown
pub mod shutdown;

pub use admission::{AdmissionGate, ProvisionalHold};
pub use allocator::OptimisticAllocator;
pub use config::{ConfigError, EngineConfig};
pub use degradation::{DegradationController, GateMode};
pub use reconciler::{ReconcileReport, Reconciler};
pub use service::{ReservationService, Strategy};
