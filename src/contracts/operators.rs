//! Operators Agreement client.
//!
//! Knows the Exchange only by address, supplied by the caller. The
//! contract enforces that `setExchange` precedes any asset interaction; this
//! client forwards requests in the order given and surfaces reverts.

use alloy::primitives::{Address, U256};

use crate::contracts::abi::IOperatorsAgreement;
use crate::contracts::binding::{ClientContext, ContractArtifact, ContractBinding, ContractHandle};
use crate::contracts::OPERATORS_AGREEMENT;
use crate::error::GridResult;
use crate::ledger::types::TransactionReceipt;

/// Client for the Operators Agreement contract.
#[derive(Clone)]
pub struct OperatorsAgreementClient {
    handle: ContractHandle,
    /// Exchange address confirmed on-chain through this client.
    exchange: Option<Address>,
}

impl OperatorsAgreementClient {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            handle: ContractHandle::new(OPERATORS_AGREEMENT, ctx),
            exchange: None,
        }
    }

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

    pub async fn owner_address(&self) -> GridResult<Address> {
        self.handle.call(IOperatorsAgreement::ownerCall {}).await
    }

    /// Point the agreement at the Exchange. The address is remembered locally
    /// only once the transaction succeeded.
    pub async fn set_exchange_address(&mut self, exchange: Address) -> GridResult<TransactionReceipt> {
        let receipt = self
            .handle
            .transact(IOperatorsAgreement::setExchangeCall { exchange })
            .await?;
        self.exchange = Some(exchange);
        Ok(receipt)
    }

    /// Exchange address set through this client, if any.
    pub fn exchange_address(&self) -> Option<Address> {
        self.exchange
    }

    /// Whitelist `asset` on the agreement. It must also be whitelisted on
    /// the Exchange before it can transact.
    pub async fn whitelist_asset(&self, asset: Address) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IOperatorsAgreement::whitelistAssetCall { asset })
            .await
    }

    /// Report produced energy. Sent by a whitelisted asset.
    pub async fn generate_kwh(&self, kwh: U256) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IOperatorsAgreement::generateKwhCall { kwh })
            .await
    }

    pub fn acting_as(&self, asset: Address) -> Self {
        Self {
            handle: self.handle.acting_as(asset),
            exchange: self.exchange,
        }
    }
}
