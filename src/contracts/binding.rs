//! Typed handles to deployed contracts.
//!
//! A [`ContractHandle`] owns at most one [`ContractBinding`]. The address is
//! assigned once, by deployment or by attaching to a known address, and only
//! read afterwards. Every call goes through the handle's binding; an unbound
//! handle fails with [`GridError::InvalidConfiguration`].

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::schema::GridConfig;
use crate::error::{GridError, GridResult};
use crate::ledger::client::LedgerClient;
use crate::ledger::submitter::TransactionSubmitter;
use crate::ledger::types::{TransactionReceipt, TransactionRequest};
use crate::resilience::RetryPolicy;

/// Compiled contract: interface description and creation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: serde_json::Value,
    pub bytecode: Bytes,
}

/// Supplies compiled contracts by name.
pub trait ArtifactSource: Send + Sync {
    fn load(&self, name: &str) -> GridResult<ContractArtifact>;
}

/// Build output directory holding `<Name>.json` files with `abi` and `bytecode`.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct ArtifactFile {
    abi: serde_json::Value,
    bytecode: String,
}

impl ArtifactDir {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ArtifactSource for ArtifactDir {
    fn load(&self, name: &str) -> GridResult<ContractArtifact> {
        let path = self.dir.join(format!("{}.json", name));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            GridError::InvalidConfiguration(format!("cannot read artifact {}: {}", path.display(), e))
        })?;
        let file: ArtifactFile = serde_json::from_str(&content).map_err(|e| {
            GridError::InvalidConfiguration(format!("malformed artifact {}: {}", path.display(), e))
        })?;
        let bytecode = Bytes::from_str(file.bytecode.trim()).map_err(|e| {
            GridError::InvalidConfiguration(format!("invalid bytecode in {}: {}", path.display(), e))
        })?;
        if bytecode.is_empty() {
            return Err(GridError::InvalidConfiguration(format!(
                "artifact {} has no bytecode",
                path.display()
            )));
        }

        Ok(ContractArtifact {
            name: name.to_string(),
            abi: file.abi,
            bytecode,
        })
    }
}

/// A deployed contract: its name and address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractBinding {
    pub name: &'static str,
    pub address: Address,
}

/// Everything a client needs to send transactions, shared by all clients.
#[derive(Clone)]
pub struct ClientContext {
    pub submitter: TransactionSubmitter,
    /// Account that signs every transaction sent through this context.
    pub sender: Address,
    pub gas_limit: u64,
    pub policy: RetryPolicy,
}

impl ClientContext {
    pub fn new(submitter: TransactionSubmitter, sender: Address) -> Self {
        Self {
            submitter,
            sender,
            gas_limit: crate::config::schema::DEFAULT_GAS_LIMIT,
            policy: RetryPolicy::default(),
        }
    }

    /// Context for `ledger` as configured: the configured sender, or the
    /// ledger's first account when none is set.
    pub async fn connect(ledger: Arc<dyn LedgerClient>, config: &GridConfig) -> GridResult<Self> {
        let sender = match config.ledger.sender.as_deref() {
            Some(s) => s.parse::<Address>().map_err(|e| {
                GridError::InvalidConfiguration(format!("invalid sender address '{}': {}", s, e))
            })?,
            None => ledger.accounts().await?.first().copied().ok_or_else(|| {
                GridError::InvalidConfiguration("ledger exposes no accounts to send from".to_string())
            })?,
        };
        tracing::info!(sender = %sender, "Transaction sender resolved");

        Ok(Self::new(TransactionSubmitter::new(ledger), sender)
            .with_policy(RetryPolicy::from(&config.submitter))
            .with_gas_limit(config.ledger.gas_limit))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

/// Name of a call's method without its parameter list.
pub fn method_name<C: SolCall>() -> &'static str {
    C::SIGNATURE.split('(').next().unwrap_or(C::SIGNATURE)
}

/// Call and transaction plumbing for one contract.
#[derive(Clone)]
pub struct ContractHandle {
    name: &'static str,
    binding: Option<ContractBinding>,
    ctx: ClientContext,
}

impl ContractHandle {
    /// An unbound handle for the contract called `name`.
    pub fn new(name: &'static str, ctx: ClientContext) -> Self {
        Self {
            name,
            binding: None,
            ctx,
        }
    }

    /// Bind to a contract already deployed at `address`.
    pub fn attach(&mut self, address: Address) -> GridResult<ContractBinding> {
        if let Some(existing) = self.binding {
            if existing.address != address {
                return Err(GridError::InvalidConfiguration(format!(
                    "{} already bound to {}",
                    self.name, existing.address
                )));
            }
            return Ok(existing);
        }
        let binding = ContractBinding {
            name: self.name,
            address,
        };
        self.binding = Some(binding);
        Ok(binding)
    }

    /// Deploy `artifact` from the context's sender and bind to the result.
    pub async fn deploy(&mut self, artifact: &ContractArtifact) -> GridResult<ContractBinding> {
        if let Some(existing) = self.binding {
            return Err(GridError::InvalidConfiguration(format!(
                "{} already bound to {}",
                self.name, existing.address
            )));
        }

        let request = TransactionRequest::deployment(
            self.ctx.sender,
            self.name,
            artifact.bytecode.clone(),
            self.ctx.gas_limit,
        );
        let receipt = match self.ctx.submitter.submit(&request, &self.ctx.policy).await {
            Ok(receipt) => receipt,
            Err(GridError::TransactionReverted { tx_hash, .. }) => {
                return Err(GridError::DeploymentFailed {
                    contract: self.name.to_string(),
                    reason: format!("creation transaction {} reverted", tx_hash),
                });
            }
            Err(e) => return Err(e),
        };

        let address = receipt.contract_address.ok_or_else(|| GridError::DeploymentFailed {
            contract: self.name.to_string(),
            reason: format!("receipt for {} carries no contract address", receipt.tx_hash),
        })?;

        tracing::info!(
            contract = self.name,
            address = %address,
            tx_hash = %receipt.tx_hash,
            "Contract deployed"
        );
        self.attach(address)
    }

    /// The binding, or `InvalidConfiguration` if none was set.
    pub fn binding(&self) -> GridResult<ContractBinding> {
        self.binding.ok_or_else(|| {
            GridError::InvalidConfiguration(format!("{} address is not configured", self.name))
        })
    }

    /// Read-only call. Returns a snapshot of state as of the node's latest block.
    pub async fn call<C: SolCall>(&self, call: C) -> GridResult<C::Return> {
        let binding = self.binding()?;
        let data = self
            .ctx
            .submitter
            .ledger()
            .call(binding.address, Bytes::from(call.abi_encode()))
            .await?;
        C::abi_decode_returns(&data).map_err(|e| GridError::Decode {
            method: method_name::<C>().to_string(),
            reason: e.to_string(),
        })
    }

    /// Build the transaction request for `call` without sending it.
    pub fn request<C: SolCall>(&self, call: &C) -> GridResult<TransactionRequest> {
        let binding = self.binding()?;
        Ok(TransactionRequest::call(
            self.ctx.sender,
            binding.address,
            method_name::<C>(),
            Bytes::from(call.abi_encode()),
            self.ctx.gas_limit,
        ))
    }

    /// Send `call` as a transaction and wait for a final receipt.
    pub async fn transact<C: SolCall>(&self, call: C) -> GridResult<TransactionReceipt> {
        let request = self.request(&call)?;
        tracing::debug!(
            contract = self.name,
            method = %request.method,
            sender = %request.sender,
            "Submitting transaction"
        );
        self.ctx.submitter.submit(&request, &self.ctx.policy).await
    }

    /// The same binding, sending from `account` instead.
    pub fn acting_as(&self, account: Address) -> Self {
        let mut handle = self.clone();
        handle.ctx.sender = account;
        handle
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }
}
