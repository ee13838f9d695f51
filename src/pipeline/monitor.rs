//! Validation pipeline: subscribe to the Exchange, fan claims out to workers.

use alloy::primitives::Address;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::schema::PipelineConfig;
use crate::error::GridResult;
use crate::ledger::client::{EventStream, LedgerClient, VALIDATION_REQUESTED};
use crate::ledger::types::ValidationEvent;
use crate::lifecycle::{Shutdown, ShutdownListener};
use crate::observability::metrics;
use crate::pipeline::journal::{ClaimJournal, JournalSummary};
use crate::pipeline::processor::{ClaimProcessor, ReconcileReport};

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Events accepted for processing during this run.
    pub accepted: usize,
    /// Redeliveries skipped because the event id was already journaled.
    pub duplicates: usize,
    /// Workers still running when the drain deadline passed.
    pub abandoned: usize,
    pub journal: JournalSummary,
}

/// Long-running service that turns `ValidationRequested` events into mints.
pub struct ValidationPipeline {
    ledger: Arc<dyn LedgerClient>,
    processor: Arc<ClaimProcessor>,
    exchange: Address,
    max_workers: usize,
    drain_timeout: Duration,
}

impl ValidationPipeline {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        processor: Arc<ClaimProcessor>,
        exchange: Address,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            ledger,
            processor,
            exchange,
            max_workers: config.max_workers.max(1),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
        }
    }

    pub fn journal(&self) -> &ClaimJournal {
        self.processor.journal()
    }

    /// Settle the journal left by a previous run. Call before [`run`](Self::run).
    pub async fn reconcile(&self) -> GridResult<ReconcileReport> {
        self.processor.reconcile().await
    }

    /// Subscribe to the Exchange and process events until shutdown.
    ///
    /// The subscription starts at the journal's resume block, so requests
    /// emitted while the orchestrator was down are still seen.
    pub async fn run(&self, shutdown: Shutdown, resume: Vec<ValidationEvent>) -> GridResult<PipelineReport> {
        let from_block = self.journal().resume_block();
        let events = self
            .ledger
            .subscribe_events(self.exchange, VALIDATION_REQUESTED, from_block)
            .await?;
        tracing::info!(
            exchange = %self.exchange,
            max_workers = self.max_workers,
            from_block = ?from_block,
            "Validation pipeline started"
        );
        Ok(self.run_with(events, shutdown, resume).await)
    }

    /// Process `events` until the stream ends or shutdown is triggered.
    ///
    /// `resume` holds journaled claims to finish first; they bypass the
    /// duplicate check since they are already in the journal.
    pub async fn run_with(
        &self,
        mut events: EventStream,
        shutdown: Shutdown,
        resume: Vec<ValidationEvent>,
    ) -> PipelineReport {
        let mut shutdown_rx = shutdown.subscribe();
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut accepted = 0usize;
        let mut duplicates = 0usize;

        for event in resume {
            if !self.spawn(&mut workers, &permits, &mut shutdown_rx, event).await {
                break;
            }
        }

        while !shutdown_rx.is_triggered() {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting events");
                    break;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Claim worker panicked");
                    }
                    metrics::record_claims_in_flight(workers.len());
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        if !self.journal().try_observe(&event) {
                            duplicates += 1;
                            tracing::debug!(event_id = %event.event_id, "Duplicate event skipped");
                            continue;
                        }
                        tracing::info!(
                            event_id = %event.event_id,
                            asset = %event.asset,
                            claimed_wh = %event.claimed_wh,
                            block = event.block_number,
                            "Validation requested"
                        );
                        accepted += 1;
                        if !self.spawn(&mut workers, &permits, &mut shutdown_rx, event).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Event stream error");
                    }
                    None => {
                        tracing::warn!("Event stream ended");
                        break;
                    }
                }
            }
        }

        let abandoned = self.drain(&mut workers).await;
        if let Err(e) = self.journal().save() {
            tracing::error!(error = %e, "Final journal save failed");
        }

        let report = PipelineReport {
            accepted,
            duplicates,
            abandoned,
            journal: self.journal().summary(),
        };
        tracing::info!(
            accepted = report.accepted,
            duplicates = report.duplicates,
            abandoned = report.abandoned,
            approved = report.journal.approved,
            rejected = report.journal.rejected,
            failed = report.journal.failed,
            "Validation pipeline stopped"
        );
        report
    }

    /// Start a worker for `event` once a slot is free.
    ///
    /// Returns false if shutdown came first. The claim then stays `Observed`
    /// in the journal and is resumed by the next run's reconciliation.
    async fn spawn(
        &self,
        workers: &mut JoinSet<()>,
        permits: &Arc<Semaphore>,
        shutdown_rx: &mut ShutdownListener,
        event: ValidationEvent,
    ) -> bool {
        // Waiting here applies backpressure to the event stream.
        let permit = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                tracing::info!(event_id = %event.event_id, "Shutdown before a worker was free, claim left for the next run");
                return false;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };
        let processor = self.processor.clone();
        workers.spawn(async move {
            let _permit = permit;
            processor.process(event).await;
        });
        metrics::record_claims_in_flight(workers.len());
        true
    }

    /// Wait for in-flight workers up to the drain deadline. Returns how many
    /// were aborted.
    async fn drain(&self, workers: &mut JoinSet<()>) -> usize {
        if workers.is_empty() {
            return 0;
        }
        tracing::info!(in_flight = workers.len(), "Draining claim workers");

        let finished = timeout(self.drain_timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Claim worker panicked");
                }
            }
        })
        .await;

        let abandoned = match finished {
            Ok(()) => 0,
            Err(_) => {
                let remaining = workers.len();
                tracing::warn!(
                    remaining,
                    "Drain deadline passed; unfinished claims stay journaled for the next run"
                );
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                remaining
            }
        };
        metrics::record_claims_in_flight(0);
        abandoned
    }
}
