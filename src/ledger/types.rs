//! Ledger-facing types and transport error definitions.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors raised by a ledger client at the transport level.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// A read-only call was rejected by the contract.
    #[error("Call reverted: {0}")]
    CallReverted(String),

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// Ledger client not initialized or unreachable.
    #[error("Ledger not available: {0}")]
    NotAvailable(String),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Outcome of a transaction as reported by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Reverted,
    /// Accepted into the pending pool, not yet included.
    Pending,
    /// The ledger has no record of the transaction.
    Unknown,
}

impl TxStatus {
    /// Whether the status is final.
    pub fn is_final(self) -> bool {
        matches!(self, TxStatus::Success | TxStatus::Reverted)
    }
}

/// Confirmation record of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    /// Set only for contract deployments.
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
}

impl TransactionReceipt {
    /// Receipt placeholder for a transaction without a final outcome.
    pub fn pending(tx_hash: TxHash) -> Self {
        Self {
            tx_hash,
            status: TxStatus::Pending,
            contract_address: None,
            block_number: None,
        }
    }
}

/// A single state-changing request. Built per call and never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub sender: Address,
    /// `None` for contract creation.
    pub target: Option<Address>,
    /// Method name, used for logs and error context.
    pub method: String,
    /// ABI-encoded call data, or creation bytecode for deployments.
    pub calldata: Bytes,
    pub gas_limit: u64,
}

impl TransactionRequest {
    /// Request invoking `method` on the contract at `target`.
    pub fn call(
        sender: Address,
        target: Address,
        method: impl Into<String>,
        calldata: Bytes,
        gas_limit: u64,
    ) -> Self {
        Self {
            sender,
            target: Some(target),
            method: method.into(),
            calldata,
            gas_limit,
        }
    }

    /// Request creating a contract from `bytecode`.
    pub fn deployment(sender: Address, contract: &str, bytecode: Bytes, gas_limit: u64) -> Self {
        Self {
            sender,
            target: None,
            method: format!("deploy {}", contract),
            calldata: bytecode,
            gas_limit,
        }
    }

    pub fn is_deployment(&self) -> bool {
        self.target.is_none()
    }
}

/// Stable identity of an emitted event: `<tx hash>:<log index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn from_log(tx_hash: TxHash, log_index: u64) -> Self {
        Self(format!("{}:{}", tx_hash, log_index))
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A request, emitted by the Exchange, to validate claimed production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEvent {
    pub event_id: EventId,
    pub asset: Address,
    pub claimed_wh: U256,
    pub block_number: u64,
}
