//! Device Registry client.

use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::contracts::abi::IDeviceRegistry;
use crate::contracts::binding::{ClientContext, ContractArtifact, ContractBinding, ContractHandle};
use crate::contracts::DEVICE_REGISTRY;
use crate::error::GridResult;
use crate::ledger::types::TransactionReceipt;

/// Snapshot of one meter's registry entry.
///
/// True as of some recent block only; re-read before acting on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Totalized Wh export.
    pub wh_produced: U256,
    /// Totalized Wh import.
    pub wh_consumed: U256,
    /// Wh available for trade.
    pub wh_available: U256,
    /// Wh required for settlement.
    pub wh_deficit: U256,
    pub is_valid_consumer: bool,
    pub is_valid_producer: bool,
}

/// Client for the Device Registry contract.
#[derive(Clone)]
pub struct DeviceRegistryClient {
    handle: ContractHandle,
}

impl DeviceRegistryClient {
    /// Unbound client; deploy or attach before use.
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            handle: ContractHandle::new(DEVICE_REGISTRY, ctx),
        }
    }

    /// Client bound to an existing deployment.
    pub fn at(ctx: ClientContext, address: Address) -> GridResult<Self> {
        let mut client = Self::new(ctx);
        client.handle.attach(address)?;
        Ok(client)
    }

    pub async fn deploy(&mut self, artifact: &ContractArtifact) -> GridResult<ContractBinding> {
        self.handle.deploy(artifact).await
    }

    pub fn binding(&self) -> GridResult<ContractBinding> {
        self.handle.binding()
    }

    /// Current CEO of the registry.
    pub async fn owner_address(&self) -> GridResult<Address> {
        self.handle.call(IDeviceRegistry::ceo_addressCall {}).await
    }

    pub async fn get_device(&self, device: Address) -> GridResult<DeviceRecord> {
        let entry = self
            .handle
            .call(IDeviceRegistry::device_indexCall { device })
            .await?;
        Ok(DeviceRecord {
            wh_produced: entry.whProduced,
            wh_consumed: entry.whConsumed,
            wh_available: entry.whAvailable,
            wh_deficit: entry.whDeficit,
            is_valid_consumer: entry.validConsumer,
            is_valid_producer: entry.validProducer,
        })
    }

    /// Hand the CEO title to `new_owner`. Only the current CEO may do this.
    pub async fn transfer_ownership(&self, new_owner: Address) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IDeviceRegistry::setCEOCall { newCeo: new_owner })
            .await
    }

    pub async fn designate_producer(&self, producer: Address) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IDeviceRegistry::designateProducerCall { producer })
            .await
    }

    pub async fn designate_consumer(&self, consumer: Address) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IDeviceRegistry::designateConsumerCall { consumer })
            .await
    }

    /// Post production from the sending meter.
    pub async fn generate_watt_hours(&self, watt_hours: U256) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IDeviceRegistry::generateWattHoursCall { wattHours: watt_hours })
            .await
    }

    /// Post consumption from the sending meter.
    pub async fn consume_watt_hours(&self, watt_hours: U256) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IDeviceRegistry::consumeWattHoursCall { wattHours: watt_hours })
            .await
    }

    /// The same deployment, with transactions sent from `meter`.
    ///
    /// Each meter posts its own readings.
    pub fn acting_as(&self, meter: Address) -> Self {
        Self {
            handle: self.handle.acting_as(meter),
        }
    }
}
