//! Claim lifecycle types.

use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ledger::types::{EventId, ValidationEvent};

/// Position of a claim in its lifecycle.
///
/// ```text
/// Observed → Validating → Approved | Rejected | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimState {
    Observed,
    Validating,
    Approved,
    Rejected,
    /// Retries exhausted; needs operator attention.
    Failed,
}

impl ClaimState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimState::Approved | ClaimState::Rejected | ClaimState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClaimState::Observed => "observed",
            ClaimState::Validating => "validating",
            ClaimState::Approved => "approved",
            ClaimState::Rejected => "rejected",
            ClaimState::Failed => "failed",
        }
    }
}

/// Journal entry for one validation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub event: ValidationEvent,
    pub state: ClaimState,
    /// Hash of the `approveMint` transaction, once one reached the ledger.
    pub tx_hash: Option<TxHash>,
    /// Processing attempts made so far.
    pub attempts: u32,
    /// Why the claim was rejected or failed.
    pub reason: Option<String>,
    /// Seconds since epoch of the last transition.
    pub updated_at: u64,
}

impl ClaimRecord {
    pub fn observed(event: ValidationEvent) -> Self {
        Self {
            event,
            state: ClaimState::Observed,
            tx_hash: None,
            attempts: 0,
            reason: None,
            updated_at: now_secs(),
        }
    }
}

/// A claim that reached `Failed`, as reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimFailure {
    pub event_id: EventId,
    pub asset: Address,
    pub claimed_wh: U256,
    pub tx_hash: Option<TxHash>,
    pub reason: String,
}

impl From<&ClaimRecord> for ClaimFailure {
    fn from(record: &ClaimRecord) -> Self {
        Self {
            event_id: record.event.event_id.clone(),
            asset: record.event.asset,
            claimed_wh: record.event.claimed_wh,
            tx_hash: record.tx_hash,
            reason: record.reason.clone().unwrap_or_default(),
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ClaimState::Observed.is_terminal());
        assert!(!ClaimState::Validating.is_terminal());
        assert!(ClaimState::Approved.is_terminal());
        assert!(ClaimState::Rejected.is_terminal());
        assert!(ClaimState::Failed.is_terminal());
    }
}
