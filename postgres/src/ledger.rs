//! `PostgreSQL`-backed [`LedgerStore`].
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE inventory_items (
//!     id             BIGSERIAL PRIMARY KEY,
//!     name           TEXT    NOT NULL,
//!     total_capacity INTEGER NOT NULL CHECK (total_capacity >= 0),
//!     remaining      INTEGER NOT NULL CHECK (remaining >= 0),
//!     version        BIGINT  NOT NULL DEFAULT 0,
//!     CHECK (remaining <= total_capacity)
//! );
//! ```
//!
//! The full schema, including `reservations`, ships in `migrations/` and is
//! applied by [`PostgresLedger::migrate`].

use crate::config::PostgresConfig;
use chrono::{DateTime, Utc};
use seatgate_core::inventory::{
    InventoryItem, ItemId, Quantity, RequesterId, Reservation, ReservationDraft, ReservationId,
    ReservationStatus, Version,
};
use seatgate_core::ledger::{LedgerError, LedgerFuture, LedgerStore};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `(id, name, total_capacity, remaining, version)`
type ItemRow = (i64, String, i32, i32, i64);

/// `(id, requester_id, item_id, quantity, status, created_at)`
type ReservationRow = (Uuid, i64, i64, i32, String, DateTime<Utc>);

/// SQLSTATE `check_violation`.
const CHECK_VIOLATION: &str = "23514";

/// SQLSTATE `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

/// Ledger store on a `PostgreSQL` connection pool.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresLedger {
    /// Connect a new pool. Every connection runs with the configured
    /// `statement_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidInput`] for a malformed URL and
    /// [`LedgerError::Unavailable`] if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, LedgerError> {
        let options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| LedgerError::InvalidInput(format!("Invalid database URL: {e}")))?
            .options([(
                "statement_timeout",
                config.statement_timeout.as_millis().to_string(),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to connect: {e}")))?;

        info!(
            max_connections = config.max_connections,
            statement_timeout_ms = config.statement_timeout.as_millis(),
            "Connected to ledger database"
        );
        Ok(Self::from_pool(pool, config.statement_timeout))
    }

    /// Wrap an existing pool. `statement_timeout` is only used to label
    /// timeout errors; it must match what the pool's connections enforce.
    #[must_use]
    pub const fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn store_error(&self, op: &'static str, error: sqlx::Error) -> LedgerError {
        let mapped = match &error {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(CHECK_VIOLATION) => LedgerError::ConstraintViolation(db.message().to_string()),
                Some(QUERY_CANCELED) => LedgerError::Timeout(self.statement_timeout),
                _ => LedgerError::Unavailable(format!("{op}: {error}")),
            },
            sqlx::Error::PoolTimedOut => {
                LedgerError::Timeout(self.pool.options().get_acquire_timeout())
            }
            _ => LedgerError::Unavailable(format!("{op}: {error}")),
        };
        warn!(op, error = %mapped, "Ledger query failed");
        mapped
    }

    /// Decrement and insert in one transaction. `expected: None` commits
    /// against capacity alone.
    async fn commit(
        &self,
        op: &'static str,
        draft: ReservationDraft,
        expected: Option<Version>,
    ) -> Result<Option<Reservation>, LedgerError> {
        let started = Instant::now();
        let item_id = draft.item_id;
        let quantity = int_param(draft.quantity.get(), "quantity")?;
        let expected_param = expected.map(version_param).transpose()?;

        // Dropping the transaction before commit rolls it back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.store_error("begin", e))?;

        let applied = decrement(&mut *tx, item_id, quantity, expected_param)
            .await
            .map_err(|e| self.store_error(op, e))?;

        if !applied {
            let exists = item_exists(&mut *tx, item_id)
                .await
                .map_err(|e| self.store_error("item_exists", e))?;
            tx.rollback()
                .await
                .map_err(|e| self.store_error("rollback", e))?;
            if !exists {
                return Err(LedgerError::ItemNotFound(item_id));
            }
            debug!(item_id = %item_id, ?expected, "Conditional decrement affected zero rows");
            observe(op, started);
            return Ok(None);
        }

        sqlx::query(
            r"
            INSERT INTO reservations (id, requester_id, item_id, quantity, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(*draft.id.as_uuid())
        .bind(draft.requester_id.value())
        .bind(item_id.value())
        .bind(quantity)
        .bind(ReservationStatus::Confirmed.as_str())
        .bind(draft.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.store_error("insert_reservation", e))?;

        tx.commit()
            .await
            .map_err(|e| self.store_error("commit", e))?;
        observe(op, started);

        Ok(Some(draft.confirm()))
    }
}

fn observe(op: &'static str, started: Instant) {
    metrics::histogram!("seatgate_ledger_query_duration_seconds", "op" => op)
        .record(started.elapsed().as_secs_f64());
}

fn int_param(value: u32, field: &str) -> Result<i32, LedgerError> {
    i32::try_from(value)
        .map_err(|_| LedgerError::InvalidInput(format!("{field} {value} exceeds INTEGER range")))
}

fn version_param(version: Version) -> Result<i64, LedgerError> {
    i64::try_from(version.value())
        .map_err(|_| LedgerError::InvalidInput(format!("version {version} exceeds BIGINT range")))
}

fn item_from_row(row: ItemRow) -> Result<InventoryItem, LedgerError> {
    let (id, name, total_capacity, remaining, version) = row;
    let out_of_range =
        |field: &str| LedgerError::ConstraintViolation(format!("item {id}: {field} out of range"));

    Ok(InventoryItem {
        id: ItemId::new(id),
        name,
        total_capacity: u32::try_from(total_capacity).map_err(|_| out_of_range("total_capacity"))?,
        remaining: u32::try_from(remaining).map_err(|_| out_of_range("remaining"))?,
        version: Version::new(u64::try_from(version).map_err(|_| out_of_range("version"))?),
    })
}

fn reservation_from_row(row: ReservationRow) -> Result<Reservation, LedgerError> {
    let (id, requester_id, item_id, quantity, status, created_at) = row;
    let seats = u32::try_from(quantity)
        .ok()
        .and_then(|q| Quantity::new(q).ok())
        .ok_or_else(|| {
            LedgerError::ConstraintViolation(format!("reservation {id}: quantity {quantity}"))
        })?;
    let status = ReservationStatus::parse(&status)
        .map_err(|e| LedgerError::ConstraintViolation(format!("reservation {id}: {e}")))?;

    Ok(Reservation {
        id: ReservationId::from_uuid(id),
        requester_id: RequesterId::new(requester_id),
        item_id: ItemId::new(item_id),
        quantity: seats,
        status,
        created_at,
    })
}

/// The compare-and-swap. `true` when exactly one row was updated.
///
/// `expected: None` drops the version predicate; the capacity predicate stays.
async fn decrement(
    conn: &mut PgConnection,
    id: ItemId,
    quantity: i32,
    expected: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r"
        UPDATE inventory_items
           SET remaining = remaining - $2,
               version = version + 1
         WHERE id = $1
           AND ($3::BIGINT IS NULL OR version = $3)
           AND remaining >= $2
        ",
    )
    .bind(id.value())
    .bind(quantity)
    .bind(expected)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn item_exists(conn: &mut PgConnection, id: ItemId) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM inventory_items WHERE id = $1)")
            .bind(id.value())
            .fetch_one(conn)
            .await?;
    Ok(exists)
}

impl LedgerStore for PostgresLedger {
    fn read_item(&self, id: ItemId) -> LedgerFuture<'_, InventoryItem> {
        Box::pin(async move {
            let started = Instant::now();
            let row: Option<ItemRow> = sqlx::query_as(
                r"
                SELECT id, name, total_capacity, remaining, version
                  FROM inventory_items
                 WHERE id = $1
                ",
            )
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.store_error("read_item", e))?;
            observe("read_item", started);

            row.map_or(Err(LedgerError::ItemNotFound(id)), item_from_row)
        })
    }

    fn conditional_decrement(
        &self,
        id: ItemId,
        quantity: Quantity,
        expected: Version,
    ) -> LedgerFuture<'_, bool> {
        Box::pin(async move {
            let started = Instant::now();
            let quantity = int_param(quantity.get(), "quantity")?;
            let expected = version_param(expected)?;

            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| self.store_error("acquire", e))?;
            let applied = decrement(&mut *conn, id, quantity, Some(expected))
                .await
                .map_err(|e| self.store_error("conditional_decrement", e))?;

            if !applied
                && !item_exists(&mut *conn, id)
                    .await
                    .map_err(|e| self.store_error("item_exists", e))?
            {
                return Err(LedgerError::ItemNotFound(id));
            }

            observe("conditional_decrement", started);
            Ok(applied)
        })
    }

    fn commit_reservation(
        &self,
        draft: ReservationDraft,
        expected: Version,
    ) -> LedgerFuture<'_, Option<Reservation>> {
        Box::pin(self.commit("commit_reservation", draft, Some(expected)))
    }

    fn commit_held_reservation(
        &self,
        draft: ReservationDraft,
    ) -> LedgerFuture<'_, Option<Reservation>> {
        Box::pin(self.commit("commit_held_reservation", draft, None))
    }

    fn create_item(&self, name: String, total_capacity: u32) -> LedgerFuture<'_, InventoryItem> {
        Box::pin(async move {
            let capacity = int_param(total_capacity, "total_capacity")?;
            let row: ItemRow = sqlx::query_as(
                r"
                INSERT INTO inventory_items (name, total_capacity, remaining)
                VALUES ($1, $2, $2)
                RETURNING id, name, total_capacity, remaining, version
                ",
            )
            .bind(&name)
            .bind(capacity)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.store_error("create_item", e))?;

            item_from_row(row)
        })
    }

    fn list_items(&self) -> LedgerFuture<'_, Vec<InventoryItem>> {
        Box::pin(async move {
            let started = Instant::now();
            let rows: Vec<ItemRow> = sqlx::query_as(
                r"
                SELECT id, name, total_capacity, remaining, version
                  FROM inventory_items
                 ORDER BY id
                ",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.store_error("list_items", e))?;
            observe("list_items", started);

            rows.into_iter().map(item_from_row).collect()
        })
    }

    fn reservations_for_item(&self, id: ItemId) -> LedgerFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let rows: Vec<ReservationRow> = sqlx::query_as(
                r"
                SELECT id, requester_id, item_id, quantity, status, created_at
                  FROM reservations
                 WHERE item_id = $1
                 ORDER BY created_at, id
                ",
            )
            .bind(id.value())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.store_error("reservations_for_item", e))?;

            rows.into_iter().map(reservation_from_row).collect()
        })
    }

    fn reservations_for_requester(
        &self,
        requester: RequesterId,
    ) -> LedgerFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let rows: Vec<ReservationRow> = sqlx::query_as(
                r"
                SELECT id, requester_id, item_id, quantity, status, created_at
                  FROM reservations
                 WHERE requester_id = $1
                 ORDER BY created_at DESC, id
                ",
            )
            .bind(requester.value())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.store_error("reservations_for_requester", e))?;

            rows.into_iter().map(reservation_from_row).collect()
        })
    }
}
