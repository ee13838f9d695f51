//! Microgrid Exchange client.

use alloy::primitives::{Address, U256};

use crate::contracts::abi::IMicrogridExchange;
use crate::contracts::binding::{ClientContext, ContractArtifact, ContractBinding, ContractHandle};
use crate::contracts::MICROGRID_EXCHANGE;
use crate::error::GridResult;
use crate::ledger::types::{TransactionReceipt, TransactionRequest};

/// Client for the Exchange contract.
#[derive(Clone)]
pub struct ExchangeClient {
    handle: ContractHandle,
}

impl ExchangeClient {
    pub fn new(ctx: ClientContext) -> Self {
        Self {
            handle: ContractHandle::new(MICROGRID_EXCHANGE, ctx),
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
        self.handle.call(IMicrogridExchange::ownerCall {}).await
    }

    /// Record the Operators Agreement on-chain. Owner only; required before
    /// whitelisted assets can interact with the exchange.
    pub async fn set_operators_agreement_address(
        &self,
        agreement: Address,
    ) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IMicrogridExchange::setOperatorsAgreementCall { agreement })
            .await
    }

    pub async fn whitelist_asset(&self, asset: Address) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IMicrogridExchange::whitelistAssetCall { asset })
            .await
    }

    /// Mint `amount` credits to `asset`. Every call mints; callers dedupe.
    pub async fn approve_mint(&self, asset: Address, amount: U256) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IMicrogridExchange::approveMintCall { asset, amount })
            .await
    }

    /// The unsent `approveMint` request, for callers that track the
    /// transaction hash themselves.
    pub fn approve_mint_request(&self, asset: Address, amount: U256) -> GridResult<TransactionRequest> {
        self.handle
            .request(&IMicrogridExchange::approveMintCall { asset, amount })
    }

    /// Ask for `watt_hours` of production to be validated (sent by the asset).
    pub async fn request_validation(&self, watt_hours: U256) -> GridResult<TransactionReceipt> {
        self.handle
            .transact(IMicrogridExchange::requestValidationCall { wattHours: watt_hours })
            .await
    }

    pub async fn balance_of(&self, account: Address) -> GridResult<U256> {
        self.handle
            .call(IMicrogridExchange::balanceOfCall { account })
            .await
    }

    pub fn acting_as(&self, account: Address) -> Self {
        Self {
            handle: self.handle.acting_as(account),
        }
    }

    pub fn context(&self) -> &ClientContext {
        self.handle.context()
    }
}
