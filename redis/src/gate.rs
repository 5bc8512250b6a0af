//! Redis-backed [`FastGate`].

use crate::config::RedisConfig;
use crate::scripts;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError, RedisResult, Script};
use seatgate_core::gate::{Admission, CounterPair, FastGate, GateError, GateFuture};
use seatgate_core::inventory::{ItemId, Quantity};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct Scripts {
    admit: Script,
    release: Script,
    fold: Script,
}

/// Fast gate on Redis counters and Lua scripts.
///
/// Provides:
/// - Atomic check-and-hold admission (`ADMIT` script)
/// - TTL-bounded provisional counters, so a crashed holder frees its seats
/// - Connection pooling via `ConnectionManager`, with automatic reconnect
///
/// Cloning shares the connection and the loaded scripts.
#[derive(Clone)]
pub struct RedisFastGate {
    conn_manager: ConnectionManager,
    scripts: Arc<Scripts>,
    key_prefix: String,
    timeout: Duration,
}

fn item_key(prefix: &str, item: ItemId, counter: &str) -> String {
    format!("{prefix}gate:{{{item}}}:{counter}")
}

fn gate_error(op: &'static str, error: &RedisError) -> GateError {
    match error.kind() {
        ErrorKind::ResponseError | ErrorKind::TypeError | ErrorKind::NoScriptError => {
            GateError::Script(format!("{op}: {error}"))
        }
        _ => GateError::Unavailable(format!("{op}: {error}")),
    }
}

fn decode_admission(status: i64, available: i64) -> Result<Admission, GateError> {
    match status {
        -1 => Ok(Admission::Unprimed),
        0 => Ok(Admission::Rejected {
            available: u64::try_from(available).unwrap_or(0),
        }),
        1 => Ok(Admission::Admitted),
        other => Err(GateError::Script(format!(
            "admit returned unknown status {other}"
        ))),
    }
}

impl RedisFastGate {
    /// Connect to Redis and load the gate scripts.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Unavailable`] if the URL is invalid or Redis
    /// cannot be reached.
    pub async fn connect(config: &RedisConfig) -> Result<Self, GateError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            GateError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            GateError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        info!(prefix = %config.key_prefix, "Connected to fast gate");
        Ok(Self {
            conn_manager,
            scripts: Arc::new(Scripts {
                admit: Script::new(scripts::ADMIT),
                release: Script::new(scripts::RELEASE),
                fold: Script::new(scripts::FOLD),
            }),
            key_prefix: config.key_prefix.clone(),
            timeout: config.operation_timeout,
        })
    }

    fn capacity_key(&self, item: ItemId) -> String {
        item_key(&self.key_prefix, item, "capacity")
    }

    fn provisional_key(&self, item: ItemId) -> String {
        item_key(&self.key_prefix, item, "provisional")
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, GateError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(gate_error(op, &e)),
            Err(_) => Err(GateError::Timeout(self.timeout)),
        }
    }
}

impl FastGate for RedisFastGate {
    fn admit_and_reserve(
        &self,
        item: ItemId,
        quantity: Quantity,
        ttl: Duration,
    ) -> GateFuture<'_, Admission> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

            let mut invocation = self.scripts.admit.prepare_invoke();
            invocation
                .key(self.capacity_key(item))
                .key(self.provisional_key(item))
                .arg(quantity.get())
                .arg(ttl_ms);

            let (status, available): (i64, i64) = self
                .bounded("admit", invocation.invoke_async(&mut conn))
                .await?;
            decode_admission(status, available)
        })
    }

    fn release(&self, item: ItemId, quantity: Quantity) -> GateFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let mut invocation = self.scripts.release.prepare_invoke();
            invocation
                .key(self.provisional_key(item))
                .arg(quantity.get());

            let left: i64 = self
                .bounded("release", invocation.invoke_async(&mut conn))
                .await?;
            debug!(item_id = %item, quantity = quantity.get(), provisional = left, "Provisional hold released");
            Ok(())
        })
    }

    fn fold(&self, item: ItemId, quantity: Quantity) -> GateFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let mut invocation = self.scripts.fold.prepare_invoke();
            invocation
                .key(self.capacity_key(item))
                .key(self.provisional_key(item))
                .arg(quantity.get());

            let _: i64 = self
                .bounded("fold", invocation.invoke_async(&mut conn))
                .await?;
            Ok(())
        })
    }

    fn set_capacity(&self, item: ItemId, value: u32) -> GateFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let () = self
                .bounded(
                    "set_capacity",
                    redis::cmd("SET")
                        .arg(self.capacity_key(item))
                        .arg(value)
                        .query_async(&mut conn),
                )
                .await?;
            Ok(())
        })
    }

    fn counters(&self, item: ItemId) -> GateFuture<'_, CounterPair> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let (capacity, provisional): (Option<u64>, Option<u64>) = self
                .bounded(
                    "counters",
                    redis::cmd("MGET")
                        .arg(self.capacity_key(item))
                        .arg(self.provisional_key(item))
                        .query_async(&mut conn),
                )
                .await?;

            Ok(CounterPair {
                capacity,
                provisional: provisional.unwrap_or(0),
            })
        })
    }

    fn ping(&self) -> GateFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: String = self
                .bounded("ping", redis::cmd("PING").query_async(&mut conn))
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_share_a_hash_tag() {
        let item = ItemId::new(42);
        assert_eq!(
            item_key("seatgate:", item, "capacity"),
            "seatgate:gate:{42}:capacity"
        );
        assert_eq!(
            item_key("", item, "provisional"),
            "gate:{42}:provisional"
        );
    }

    #[test]
    fn admission_statuses_decode() {
        assert_eq!(decode_admission(-1, 0), Ok(Admission::Unprimed));
        assert_eq!(
            decode_admission(0, 3),
            Ok(Admission::Rejected { available: 3 })
        );
        assert_eq!(decode_admission(1, 7), Ok(Admission::Admitted));
        assert!(matches!(decode_admission(2, 0), Err(GateError::Script(_))));
    }

    #[test]
    fn redis_errors_are_classified() {
        let script = RedisError::from((ErrorKind::ResponseError, "ERR syntax"));
        assert!(matches!(gate_error("admit", &script), GateError::Script(_)));

        let io = RedisError::from((ErrorKind::IoError, "broken pipe"));
        assert!(matches!(gate_error("admit", &io), GateError::Unavailable(_)));
    }
}
