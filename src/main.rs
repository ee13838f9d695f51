//! Microgrid orchestrator daemon.
//!
//! Watches the Exchange for production claims and approves the valid ones.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │                   MICROGRID ORCHESTRATOR                      │
//!   │                                                               │
//!   │  ledger (RpcLedger) ──▶ pipeline::monitor ──▶ worker pool     │
//!   │        ▲                    │                    │            │
//!   │        │                    ▼                    ▼            │
//!   │        │              pipeline::journal ◀── processor         │
//!   │        │                    │                    │            │
//!   │        └──── contracts (ExchangeClient.approveMint) ◀┘        │
//!   │                             │                                 │
//!   │                    admin API (read-only)                      │
//!   └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use microgrid_orchestrator::admin::{self, AdminState};
use microgrid_orchestrator::config::load_config;
use microgrid_orchestrator::contracts::{ClientContext, GridClients};
use microgrid_orchestrator::ledger::{LedgerClient, RpcLedger};
use microgrid_orchestrator::lifecycle::signals::shutdown_on_signal;
use microgrid_orchestrator::observability::{logging, metrics};
use microgrid_orchestrator::pipeline::{
    CapacityPolicy, ClaimFailure, ClaimJournal, ClaimProcessor, ClaimRetry, ValidationPipeline,
};
use microgrid_orchestrator::Shutdown;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("grid.toml"));

    let config = load_config(&config_path)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "microgrid-orchestrator starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedger::new(config.ledger.clone()).await?);
    let ctx = ClientContext::connect(ledger.clone(), &config).await?;
    let clients = GridClients::from_config(ctx, &config.contracts)?;

    let journal = ClaimJournal::open(config.pipeline.journal_path.as_deref().map(std::path::Path::new))?;
    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let admin_task = if config.admin.enabled {
        let state = AdminState::new(journal.clone(), &config.admin.api_key);
        let bind_address = config.admin.bind_address.clone();
        let admin_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = admin::serve(&bind_address, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }))
    } else {
        None
    };

    if !config.pipeline.enabled {
        tracing::info!("Validation pipeline disabled");
        shutdown.subscribe().recv().await;
    } else {
        let exchange = clients.exchange.binding()?.address;
        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<ClaimFailure>();
        tokio::spawn(async move {
            while let Some(failure) = failure_rx.recv().await {
                tracing::error!(
                    event_id = %failure.event_id,
                    asset = %failure.asset,
                    claimed_wh = %failure.claimed_wh,
                    tx_hash = ?failure.tx_hash,
                    reason = %failure.reason,
                    "Claim needs operator attention"
                );
            }
        });

        let policy = Arc::new(CapacityPolicy::new(clients.registry.clone()).with_journal(journal.clone()));
        let processor = ClaimProcessor::new(
            clients.exchange.clone(),
            policy,
            journal.clone(),
            ClaimRetry::from(&config.pipeline),
        )
        .with_failure_sink(failure_tx);

        let pipeline = ValidationPipeline::new(ledger, Arc::new(processor), exchange, &config.pipeline);
        let mut stop = shutdown.subscribe();
        let reconciled = tokio::select! {
            report = pipeline.reconcile() => Some(report?),
            _ = stop.recv() => None,
        };
        match reconciled {
            Some(report) => {
                pipeline.run(shutdown.clone(), report.resumable).await?;
            }
            None => {
                tracing::info!("Shutdown during reconciliation, pipeline not started");
                pipeline.journal().save()?;
            }
        }
        shutdown.trigger();
    }

    if let Some(task) = admin_task {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
