//! Flash-sale load run.
//!
//! Many requesters race for a handful of seats. Run it once with
//! `FLASH_SALE_STRATEGY=gate` and once with `optimistic` and compare the
//! ledger writes per request.

mod config;
mod report;

use anyhow::{Context, anyhow};
use config::{Backend, Config};
use report::Report;
use seatgate_core::gate::FastGate;
use seatgate_core::inventory::{Quantity, RequesterId};
use seatgate_core::ledger::LedgerStore;
use seatgate_postgres::PostgresLedger;
use seatgate_redis::RedisFastGate;
use seatgate_runtime::metrics::MetricsServer;
use seatgate_runtime::service::ReservationService;
use seatgate_runtime::shutdown::ShutdownCoordinator;
use seatgate_testing::{InMemoryFastGate, InMemoryLedger};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn backends(config: &Config) -> anyhow::Result<(Arc<dyn LedgerStore>, Arc<dyn FastGate>)> {
    match config.backend {
        Backend::Memory => {
            let ledger = InMemoryLedger::new();
            ledger.set_contention_window(config.contention_window);
            Ok((Arc::new(ledger), Arc::new(InMemoryFastGate::new())))
        }
        Backend::External => {
            let ledger = PostgresLedger::connect(&config.postgres)
                .await
                .context("connecting to the ledger database")?;
            ledger.migrate().await.context("migrating the ledger")?;
            let gate = RedisFastGate::connect(&config.redis)
                .await
                .context("connecting to the fast gate")?;
            Ok((Arc::new(ledger), Arc::new(gate)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flash_sale=info,seatgate_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    config.engine.validate()?;
    let quantity = Quantity::new(config.quantity)?;
    info!(
        backend = %config.backend,
        strategy = %config.strategy,
        requesters = config.requesters,
        capacity = config.capacity,
        "Configuration loaded"
    );

    let mut metrics_server = MetricsServer::new(config.metrics_addr);
    metrics_server.start()?;

    let (ledger, gate) = backends(&config).await?;
    let service = Arc::new(ReservationService::new(ledger, gate, config.engine.clone()));

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    service.start_background(&mut coordinator);

    let item = service.create_item("flash-sale", config.capacity).await?;
    let item_id = item.id;
    info!(item_id = %item_id, "Sale open");

    let started = Instant::now();
    let handles: Vec<_> = (0..config.requesters)
        .map(|i| {
            let service = Arc::clone(&service);
            let strategy = config.strategy;
            tokio::spawn(async move {
                let sent = Instant::now();
                let result = service
                    .reserve_with(strategy, item_id, RequesterId::new(i64::from(i)), quantity)
                    .await;
                (result, sent.elapsed())
            })
        })
        .collect();

    let mut report = Report::new(config.strategy, config.capacity);
    for handle in handles {
        let (result, latency) = handle.await?;
        report.record(&result, latency);
    }

    let remaining = match service.availability(item_id).await {
        Ok(item) => Some(item.remaining),
        Err(e) => {
            warn!(error = %e, "Could not read final availability");
            None
        }
    };
    report.finish(started.elapsed(), remaining, service.metrics());
    println!("{report}");

    if config.print_metrics {
        if let Some(exposition) = metrics_server.render() {
            println!("{exposition}");
        }
    }

    coordinator
        .shutdown()
        .await
        .map_err(|stuck| anyhow!("background tasks did not stop: {}", stuck.join(", ")))?;

    if report.overbooked() {
        return Err(anyhow!("more seats confirmed than capacity"));
    }
    Ok(())
}
