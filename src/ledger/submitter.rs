//! Transaction submission and confirmation monitoring.
//!
//! # Responsibilities
//! - Broadcast a request, retrying transport failures that produced no hash
//! - Poll the receipt with bounded backoff until a final status or deadline
//! - Report reverts and timeouts as distinct, non-resubmitting failures

use alloy::primitives::TxHash;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;

use crate::error::{GridError, GridResult};
use crate::ledger::client::LedgerClient;
use crate::ledger::types::{TransactionReceipt, TransactionRequest, TxStatus};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;

/// Turns a request into a confirmed-or-failed outcome.
#[derive(Clone)]
pub struct TransactionSubmitter {
    ledger: Arc<dyn LedgerClient>,
}

impl TransactionSubmitter {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Submit `request` and wait for its receipt.
    ///
    /// Exactly one transaction reaches the ledger per call: transport
    /// failures are retried only while no hash has been obtained.
    pub async fn submit(
        &self,
        request: &TransactionRequest,
        policy: &RetryPolicy,
    ) -> GridResult<TransactionReceipt> {
        let tx_hash = self.broadcast(request, policy).await?;
        self.wait_for_confirmation(tx_hash, &request.method, policy).await
    }

    /// Hand the request to the ledger, returning its hash.
    pub async fn broadcast(
        &self,
        request: &TransactionRequest,
        policy: &RetryPolicy,
    ) -> GridResult<TxHash> {
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let sent = match request.target {
                Some(target) => {
                    self.ledger
                        .transact(request.sender, target, request.calldata.clone(), request.gas_limit)
                        .await
                }
                None => {
                    self.ledger
                        .deploy(request.sender, request.calldata.clone(), request.gas_limit)
                        .await
                }
            };

            match sent {
                Ok(tx_hash) => {
                    tracing::debug!(
                        tx_hash = %tx_hash,
                        method = %request.method,
                        attempt,
                        "Transaction accepted"
                    );
                    return Ok(tx_hash);
                }
                Err(e) => {
                    tracing::warn!(
                        method = %request.method,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transaction submission failed"
                    );
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        sleep(policy.delay(attempt)).await;
                    }
                }
            }
        }

        metrics::record_transaction(&request.method, "submission_failed");
        Err(GridError::SubmissionFailed {
            method: request.method.clone(),
            attempts: max_attempts,
            reason: last_error,
        })
    }

    /// Poll for the receipt of `tx_hash` until it is final or `policy.max_wait` elapses.
    pub async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        method: &str,
        policy: &RetryPolicy,
    ) -> GridResult<TransactionReceipt> {
        let started = Instant::now();
        let deadline = started + policy.max_wait;
        let mut poll = 0u32;

        loop {
            let status = match self.ledger.get_receipt(tx_hash).await {
                Ok(receipt) => match receipt.status {
                    TxStatus::Success => {
                        metrics::record_transaction(method, "success");
                        metrics::record_confirmation_latency(started.elapsed());
                        tracing::info!(
                            tx_hash = %tx_hash,
                            method,
                            block = ?receipt.block_number,
                            "Transaction confirmed"
                        );
                        return Ok(receipt);
                    }
                    TxStatus::Reverted => {
                        metrics::record_transaction(method, "reverted");
                        tracing::warn!(tx_hash = %tx_hash, method, "Transaction reverted");
                        return Err(GridError::TransactionReverted {
                            tx_hash,
                            method: method.to_string(),
                        });
                    }
                    other => other,
                },
                Err(e) => {
                    tracing::warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed");
                    TxStatus::Unknown
                }
            };

            let now = Instant::now();
            if now >= deadline {
                metrics::record_transaction(method, "confirmation_timeout");
                tracing::warn!(
                    tx_hash = %tx_hash,
                    method,
                    status = ?status,
                    "Confirmation deadline exceeded"
                );
                return Err(GridError::ConfirmationTimeout {
                    tx_hash,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            poll += 1;
            tracing::debug!(tx_hash = %tx_hash, poll, status = ?status, "Transaction pending");
            sleep(policy.delay(poll).min(deadline - now)).await;
        }
    }

    /// The ledger this submitter writes to.
    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }
}
