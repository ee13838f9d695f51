//! Error taxonomy shared by the contract clients and the validation pipeline.

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::ledger::types::LedgerError;

/// Errors surfaced by administrative operations and claim processing.
#[derive(Debug, Error)]
pub enum GridError {
    /// No transaction identifier was obtained; nothing changed on-chain.
    #[error("Submission of {method} failed after {attempts} attempt(s): {reason}")]
    SubmissionFailed {
        method: String,
        attempts: u32,
        reason: String,
    },

    /// The transaction was accepted but its outcome is still unknown.
    #[error("Transaction {tx_hash} not confirmed after {waited_ms} ms")]
    ConfirmationTimeout { tx_hash: TxHash, waited_ms: u64 },

    /// The contract rejected the transaction.
    #[error("Transaction {tx_hash} ({method}) reverted")]
    TransactionReverted { tx_hash: TxHash, method: String },

    /// A deployment receipt carried no contract address.
    #[error("Deployment of {contract} failed: {reason}")]
    DeploymentFailed { contract: String, reason: String },

    /// An operation was invoked before its prerequisites were configured.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Validation policy declined a claim. Not a fault.
    #[error("Validation rejected: {reason}")]
    ValidationRejected { reason: String },

    /// Read-path failure talking to the ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A call returned data that does not match the method's return type.
    #[error("Failed to decode result of {method}: {reason}")]
    Decode { method: String, reason: String },

    /// The idempotency journal could not be read or written.
    #[error("Journal error: {0}")]
    Journal(String),
}

impl GridError {
    /// Whether the validation pipeline may retry the claim that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::SubmissionFailed { .. } | GridError::ConfirmationTimeout { .. }
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GridError::SubmissionFailed { .. } => "submission_failed",
            GridError::ConfirmationTimeout { .. } => "confirmation_timeout",
            GridError::TransactionReverted { .. } => "reverted",
            GridError::DeploymentFailed { .. } => "deployment_failed",
            GridError::InvalidConfiguration(_) => "invalid_configuration",
            GridError::ValidationRejected { .. } => "validation_rejected",
            GridError::Ledger(_) => "ledger",
            GridError::Decode { .. } => "decode",
            GridError::Journal(_) => "journal",
        }
    }
}

/// Result type for orchestration operations.
pub type GridResult<T> = Result<T, GridError>;
