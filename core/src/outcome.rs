//! Reservation outcomes and the request-level error taxonomy.
//!
//! Business rejections are values ([`ReserveOutcome::Rejected`]), transient
//! failures are errors ([`AllocationError`]). A store outage is never reported
//! as sold out.
//!
//! | Variant | Terminal | Caller action |
//! |---|---|---|
//! | `Rejected(SoldOut)` | yes | stop, nothing left |
//! | `Rejected(Contention)` | for this call | retry later |
//! | `Rejected(GateUnavailable)` | for this call | retry later |
//! | `Err(Store)` | no | transient server error, retry |

use crate::inventory::{ItemId, Reservation};
use crate::ledger::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a reservation was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// True capacity is insufficient.
    SoldOut,
    /// Optimistic retries were exhausted.
    Contention,
    /// The fast gate is unhealthy and fallback is disabled.
    GateUnavailable,
}

impl RejectReason {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SoldOut => "sold_out",
            Self::Contention => "contention",
            Self::GateUnavailable => "gate_unavailable",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business result of a reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Seats were durably allocated.
    Confirmed(Reservation),
    /// Seats were not allocated.
    Rejected(RejectReason),
}

impl ReserveOutcome {
    /// Whether seats were allocated.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    /// The reservation, if confirmed.
    #[must_use]
    pub const fn reservation(&self) -> Option<&Reservation> {
        match self {
            Self::Confirmed(reservation) => Some(reservation),
            Self::Rejected(_) => None,
        }
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub const fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Confirmed(_) => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }
}

/// Request-level failures that are not business rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// The ledger failed; surfaced as a retryable server error.
    #[error("Ledger store failure: {0}")]
    Store(LedgerError),

    /// The requested item does not exist.
    #[error("Inventory item not found: {0}")]
    ItemNotFound(ItemId),
}

impl AllocationError {
    /// Whether the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<LedgerError> for AllocationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ItemNotFound(id) => Self::ItemNotFound(id),
            other => Self::Store(other),
        }
    }
}
