//! Inventory items, reservations and the strong types around them.
//!
//! An [`InventoryItem`] is owned by the ledger and mutated only through the
//! conditional decrement. A [`Reservation`] is the append-only audit record of a
//! successful decrement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for parsing identifiers and quantities from external input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Identifier was not a valid integer.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
    /// Quantity was zero.
    #[error("Quantity must be greater than zero")]
    ZeroQuantity,
    /// Reservation status string was not recognised.
    #[error("Invalid reservation status: {0}")]
    InvalidStatus(String),
}

/// Identifier of an inventory item (an event, a section, a flash-sale SKU).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(i64);

impl ItemId {
    /// Create an item id from its ledger key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw ledger key.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|_| ParseError::InvalidId(s.to_string()))
    }
}

/// Identifier of whoever asked for seats.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(i64);

impl RequesterId {
    /// Create a requester id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a reservation row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Generate a fresh random reservation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (e.g. loaded from the ledger).
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of seats requested. Always greater than zero.
///
/// # Examples
///
/// ```
/// use seatgate_core::inventory::Quantity;
///
/// assert!(Quantity::new(0).is_err());
/// assert_eq!(Quantity::ONE.get(), 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    /// A single seat.
    pub const ONE: Self = Self(1);

    /// Create a quantity.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::ZeroQuantity`] if `value` is zero.
    pub const fn new(value: u32) -> Result<Self, ParseError> {
        if value == 0 {
            return Err(ParseError::ZeroQuantity);
        }
        Ok(Self(value))
    }

    /// Get the number of seats.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Quantity {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optimistic concurrency token of an inventory item.
///
/// Starts at 0 and increments by exactly 1 on every successful durable decrement.
/// A conditional decrement carrying a stale version affects zero rows.
///
/// # Examples
///
/// ```
/// use seatgate_core::inventory::Version;
///
/// let v0 = Version::INITIAL;
/// assert_eq!(v0.next(), Version::new(1));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly created item.
    pub const INITIAL: Self = Self(0);

    /// Create a version with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// An inventory item as stored in the ledger.
///
/// Invariant: `remaining <= total_capacity`. Non-negativity is carried by the
/// unsigned type here and by a CHECK constraint in the durable store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Ledger key.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Capacity the item was created with.
    pub total_capacity: u32,
    /// Seats not yet allocated.
    pub remaining: u32,
    /// Optimistic concurrency token.
    pub version: Version,
}

impl InventoryItem {
    /// Whether `quantity` seats can still be allocated from this snapshot.
    #[must_use]
    pub const fn can_satisfy(&self, quantity: Quantity) -> bool {
        self.remaining >= quantity.get()
    }

    /// Seats already allocated.
    #[must_use]
    pub const fn allocated(&self) -> u32 {
        self.total_capacity.saturating_sub(self.remaining)
    }
}

/// Status of a reservation record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Seats were durably decremented for this reservation.
    Confirmed,
    /// The reservation was turned down.
    Rejected,
}

impl ReservationStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidStatus`] for unknown strings.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ParseError::InvalidStatus(s.to_string())),
        }
    }
}

/// A reservation row. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation id.
    pub id: ReservationId,
    /// Who reserved.
    pub requester_id: RequesterId,
    /// What was reserved.
    pub item_id: ItemId,
    /// How many seats.
    pub quantity: Quantity,
    /// Always `Confirmed` for rows produced by a commit.
    pub status: ReservationStatus,
    /// When the commit happened.
    pub created_at: DateTime<Utc>,
}

/// The reservation a commit will persist if its conditional decrement wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationDraft {
    /// Pre-generated id, so retries of one logical call do not mint new ids.
    pub id: ReservationId,
    /// Who is reserving.
    pub requester_id: RequesterId,
    /// Target item.
    pub item_id: ItemId,
    /// Seats to decrement.
    pub quantity: Quantity,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

impl ReservationDraft {
    /// Start a draft with a fresh id.
    #[must_use]
    pub fn new(
        requester_id: RequesterId,
        item_id: ItemId,
        quantity: Quantity,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            requester_id,
            item_id,
            quantity,
            created_at,
        }
    }

    /// Turn the draft into the confirmed row it becomes after a winning commit.
    #[must_use]
    pub fn confirm(self) -> Reservation {
        Reservation {
            id: self.id,
            requester_id: self.requester_id,
            item_id: self.item_id,
            quantity: self.quantity,
            status: ReservationStatus::Confirmed,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn quantity_rejects_zero() {
        assert_eq!(Quantity::new(0), Err(ParseError::ZeroQuantity));
        assert_eq!(Quantity::new(3).map(Quantity::get), Ok(3));
    }

    #[test]
    fn quantity_deserialization_validates() {
        let ok: Result<Quantity, _> = serde_json::from_str("2");
        assert!(ok.is_ok());
        let zero: Result<Quantity, _> = serde_json::from_str("0");
        assert!(zero.is_err());
    }

    #[test]
    fn item_id_parses_integers_only() {
        assert_eq!("42".parse::<ItemId>(), Ok(ItemId::new(42)));
        assert!("forty-two".parse::<ItemId>().is_err());
    }

    #[test]
    fn item_capacity_checks() {
        let item = InventoryItem {
            id: ItemId::new(1),
            name: "Main stage".to_string(),
            total_capacity: 10,
            remaining: 2,
            version: Version::new(8),
        };
        assert!(item.can_satisfy(Quantity::ONE));
        assert!(item.can_satisfy(Quantity::new(2).unwrap()));
        assert!(!item.can_satisfy(Quantity::new(3).unwrap()));
        assert_eq!(item.allocated(), 8);
    }

    #[test]
    fn status_round_trips_through_database_strings() {
        for status in [ReservationStatus::Confirmed, ReservationStatus::Rejected] {
            assert_eq!(ReservationStatus::parse(status.as_str()), Ok(status));
        }
        assert!(ReservationStatus::parse("cancelled").is_err());
    }

    #[test]
    fn draft_confirms_with_same_identity() {
        let draft = ReservationDraft::new(
            RequesterId::new(5),
            ItemId::new(9),
            Quantity::ONE,
            Utc::now(),
        );
        let id = draft.id;
        let reservation = draft.confirm();
        assert_eq!(reservation.id, id);
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
    }
}
