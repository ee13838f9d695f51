//! Per-claim state machine: validate, mint, confirm.
//!
//! # Idempotency
//! A claim's key is its event id. Once an `approveMint` transaction for a
//! claim has a hash, that hash is journaled and later attempts only re-poll
//! it. A claim is never minted by two transactions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::schema::PipelineConfig;
use crate::contracts::exchange::ExchangeClient;
use crate::error::{GridError, GridResult};
use crate::ledger::types::{TransactionReceipt, TxStatus, ValidationEvent};
use crate::observability::metrics;
use crate::pipeline::journal::ClaimJournal;
use crate::pipeline::policy::ValidationPolicy;
use crate::pipeline::types::{ClaimFailure, ClaimRecord, ClaimState};
use crate::resilience::backoff::calculate_backoff;

const APPROVE_MINT: &str = "approveMint";

/// Bounds on automatic claim retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRetry {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ClaimRetry {
    fn delay(&self, retry: u32) -> Duration {
        calculate_backoff(
            retry,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
        )
    }
}

impl From<&PipelineConfig> for ClaimRetry {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
        }
    }
}

/// Result of a reconciliation pass over the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Claims whose journaled transaction has since succeeded.
    pub approved: usize,
    /// Claims whose journaled transaction reverted.
    pub rejected: usize,
    /// Claims that were interrupted mid-submission and cannot be resumed safely.
    pub failed: usize,
    /// Failed claims whose receipt could not be fetched; checked again next pass.
    pub deferred: usize,
    /// Claims to resume processing.
    pub resumable: Vec<ValidationEvent>,
}

/// Drives one claim at a time through validation and minting.
pub struct ClaimProcessor {
    exchange: ExchangeClient,
    policy: Arc<dyn ValidationPolicy>,
    journal: ClaimJournal,
    retry: ClaimRetry,
    failures: Option<mpsc::UnboundedSender<ClaimFailure>>,
}

impl ClaimProcessor {
    pub fn new(
        exchange: ExchangeClient,
        policy: Arc<dyn ValidationPolicy>,
        journal: ClaimJournal,
        retry: ClaimRetry,
    ) -> Self {
        Self {
            exchange,
            policy,
            journal,
            retry,
            failures: None,
        }
    }

    /// Report every claim that ends in `Failed` to `sink`.
    pub fn with_failure_sink(mut self, sink: mpsc::UnboundedSender<ClaimFailure>) -> Self {
        self.failures = Some(sink);
        self
    }

    pub fn journal(&self) -> &ClaimJournal {
        &self.journal
    }

    pub fn exchange(&self) -> &ExchangeClient {
        &self.exchange
    }

    /// Run the claim for `event` to a terminal state.
    ///
    /// The event must already be in the journal.
    pub async fn process(&self, event: ValidationEvent) -> ClaimState {
        let id = &event.event_id;
        let mut retry = 0u32;

        loop {
            self.journal.transition(id, ClaimState::Validating, None);

            match self.attempt(&event).await {
                Ok(receipt) => {
                    tracing::info!(
                        event_id = %id,
                        asset = %event.asset,
                        amount = %event.claimed_wh,
                        tx_hash = %receipt.tx_hash,
                        "Claim approved"
                    );
                    return self.finish(&event, ClaimState::Approved, None);
                }
                Err(GridError::ValidationRejected { reason }) => {
                    tracing::info!(event_id = %id, asset = %event.asset, reason = %reason, "Claim rejected");
                    return self.finish(&event, ClaimState::Rejected, Some(reason));
                }
                Err(e @ GridError::TransactionReverted { .. }) => {
                    tracing::warn!(event_id = %id, error = %e, "Mint reverted");
                    return self.finish(&event, ClaimState::Rejected, Some(e.to_string()));
                }
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay(retry);
                    tracing::warn!(
                        event_id = %id,
                        error = %e,
                        retry,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Claim attempt failed, requeueing"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(event_id = %id, error = %e, retries = retry, "Claim failed");
                    return self.finish(&event, ClaimState::Failed, Some(e.to_string()));
                }
            }
        }
    }

    /// One pass: re-poll a journaled transaction, or validate and submit.
    async fn attempt(&self, event: &ValidationEvent) -> GridResult<TransactionReceipt> {
        let ctx = self.exchange.context();

        if let Some(tx_hash) = self.journal.get(&event.event_id).and_then(|r| r.tx_hash) {
            tracing::debug!(event_id = %event.event_id, tx_hash = %tx_hash, "Re-polling prior submission");
            return ctx
                .submitter
                .wait_for_confirmation(tx_hash, APPROVE_MINT, &ctx.policy)
                .await;
        }

        self.policy.validate(event).await?;

        let request = self.exchange.approve_mint_request(event.asset, event.claimed_wh)?;
        let tx_hash = ctx.submitter.broadcast(&request, &ctx.policy).await?;
        self.journal.record_submission(&event.event_id, tx_hash);

        ctx.submitter
            .wait_for_confirmation(tx_hash, &request.method, &ctx.policy)
            .await
    }

    fn finish(&self, event: &ValidationEvent, state: ClaimState, reason: Option<String>) -> ClaimState {
        self.journal.transition(&event.event_id, state, reason);
        metrics::record_claim_outcome(state.as_str());

        if state == ClaimState::Failed {
            if let (Some(sink), Some(record)) = (&self.failures, self.journal.get(&event.event_id)) {
                let _ = sink.send(ClaimFailure::from(&record));
            }
        }
        state
    }

    /// Settle claims left unfinished or failed by an earlier run.
    ///
    /// Journaled transactions are looked up, never resent. Claims that were
    /// validating without a journaled hash may have reached the ledger
    /// unrecorded and are failed for an operator to check. A receipt that
    /// cannot be fetched leaves its claim for a later pass.
    pub async fn reconcile(&self) -> GridResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let ledger = self.exchange.context().submitter.ledger().clone();

        let mut candidates = self.journal.unfinished();
        candidates.extend(
            self.journal
                .in_state(ClaimState::Failed)
                .into_iter()
                .filter(|r| r.tx_hash.is_some()),
        );

        for record in candidates {
            let id = record.event.event_id.clone();
            match (record.state, record.tx_hash) {
                (ClaimState::Observed, _) => report.resumable.push(record.event),
                (state, Some(tx_hash)) => {
                    let receipt = match ledger.get_receipt(tx_hash).await {
                        Ok(receipt) => receipt,
                        // Resuming only re-polls the journaled hash.
                        Err(e) if state == ClaimState::Validating => {
                            tracing::warn!(event_id = %id, tx_hash = %tx_hash, error = %e, "Receipt lookup failed, resuming claim");
                            report.resumable.push(record.event);
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(event_id = %id, tx_hash = %tx_hash, error = %e, "Receipt lookup failed, leaving claim for the next pass");
                            report.deferred += 1;
                            continue;
                        }
                    };
                    match receipt.status {
                        TxStatus::Success => {
                            tracing::info!(event_id = %id, tx_hash = %tx_hash, "Reconciled prior mint as approved");
                            self.finish(&record.event, ClaimState::Approved, None);
                            report.approved += 1;
                        }
                        TxStatus::Reverted => {
                            self.finish(
                                &record.event,
                                ClaimState::Rejected,
                                Some(format!("transaction {} reverted", tx_hash)),
                            );
                            report.rejected += 1;
                        }
                        TxStatus::Pending | TxStatus::Unknown if state == ClaimState::Validating => {
                            tracing::info!(event_id = %id, tx_hash = %tx_hash, "Prior mint still unconfirmed, resuming");
                            report.resumable.push(record.event);
                        }
                        TxStatus::Pending | TxStatus::Unknown => {}
                    }
                }
                (_, None) => {
                    let reason = interrupted_reason(&record);
                    tracing::error!(event_id = %id, reason = %reason, "Interrupted claim needs manual check");
                    self.finish(&record.event, ClaimState::Failed, Some(reason));
                    report.failed += 1;
                }
            }
        }

        if !report.resumable.is_empty()
            || report.approved + report.rejected + report.failed + report.deferred > 0
        {
            tracing::info!(
                approved = report.approved,
                rejected = report.rejected,
                failed = report.failed,
                deferred = report.deferred,
                resumable = report.resumable.len(),
                "Reconciliation complete"
            );
        }
        Ok(report)
    }
}

fn interrupted_reason(record: &ClaimRecord) -> String {
    format!(
        "interrupted during attempt {} before a transaction hash was recorded; verify {} on-chain",
        record.attempts, APPROVE_MINT
    )
}
