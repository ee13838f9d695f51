//! Validation policies applied before minting.

use alloy::primitives::U256;
use async_trait::async_trait;

use crate::contracts::registry::DeviceRegistryClient;
use crate::error::{GridError, GridResult};
use crate::ledger::types::ValidationEvent;
use crate::pipeline::journal::ClaimJournal;

/// Decides whether a production claim may be minted.
///
/// Returns `GridError::ValidationRejected` to decline a claim. Any other
/// error means the decision could not be made.
#[async_trait]
pub trait ValidationPolicy: Send + Sync {
    async fn validate(&self, event: &ValidationEvent) -> GridResult<()>;
}

/// Accepts a claim only from a registered producer whose available energy
/// on the Device Registry covers the claimed amount.
///
/// With a journal attached, energy already minted for the asset, and energy
/// claimed by its earlier in-flight claims, is deducted from what is
/// available. Without one, each claim is checked on its own.
pub struct CapacityPolicy {
    registry: DeviceRegistryClient,
    journal: Option<ClaimJournal>,
}

impl CapacityPolicy {
    pub fn new(registry: DeviceRegistryClient) -> Self {
        Self {
            registry,
            journal: None,
        }
    }

    /// Count claims recorded in `journal` against available energy.
    pub fn with_journal(mut self, journal: ClaimJournal) -> Self {
        self.journal = Some(journal);
        self
    }
}

fn reject(reason: String) -> GridError {
    GridError::ValidationRejected { reason }
}

#[async_trait]
impl ValidationPolicy for CapacityPolicy {
    async fn validate(&self, event: &ValidationEvent) -> GridResult<()> {
        if event.claimed_wh == U256::ZERO {
            return Err(reject("claim of 0 Wh".to_string()));
        }

        let device = self.registry.get_device(event.asset).await?;
        if !device.is_valid_producer {
            return Err(reject(format!("{} is not a registered producer", event.asset)));
        }
        let committed = self
            .journal
            .as_ref()
            .map_or(U256::ZERO, |journal| journal.committed_wh(event));
        let available = device.wh_available.saturating_sub(committed);
        if event.claimed_wh > available {
            return Err(reject(format!(
                "claimed {} Wh exceeds available {} Wh ({} Wh on record, {} Wh already committed)",
                event.claimed_wh, available, device.wh_available, committed
            )));
        }

        tracing::debug!(
            event_id = %event.event_id,
            asset = %event.asset,
            claimed_wh = %event.claimed_wh,
            available_wh = %available,
            committed_wh = %committed,
            "Claim within capacity"
        );
        Ok(())
    }
}

/// Accepts every claim.
pub struct AcceptAll;

#[async_trait]
impl ValidationPolicy for AcceptAll {
    async fn validate(&self, _event: &ValidationEvent) -> GridResult<()> {
        Ok(())
    }
}
