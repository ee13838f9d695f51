//! Ordered deployment and wiring of the marketplace.
//!
//! # Order
//! ```text
//! deploy DeviceRegistry → deploy MicrogridExchange → deploy OperatorsAgreement
//!     → OperatorsAgreement.setExchange → Exchange.setOperatorsAgreement
//!     → whitelist assets on Exchange and OperatorsAgreement
//!     → designate producers and consumers on DeviceRegistry
//! ```
//!
//! There is no rollback on-chain. A failed run reports the steps that did
//! complete so the operator can resume by hand.

use alloy::primitives::Address;
use serde::Serialize;
use thiserror::Error;

use crate::config::schema::ContractsConfig;
use crate::contracts::binding::{ArtifactSource, ClientContext};
use crate::contracts::exchange::ExchangeClient;
use crate::contracts::operators::OperatorsAgreementClient;
use crate::contracts::registry::DeviceRegistryClient;
use crate::contracts::{DEVICE_REGISTRY, MICROGRID_EXCHANGE, OPERATORS_AGREEMENT};
use crate::error::{GridError, GridResult};

/// Accounts to enrol once the contracts are wired.
#[derive(Debug, Clone, Default)]
pub struct SetupPlan {
    /// Whitelisted on both the Exchange and the Operators Agreement.
    pub assets: Vec<Address>,
    pub producers: Vec<Address>,
    pub consumers: Vec<Address>,
}

/// A setup step that completed on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SetupStep {
    Deployed { contract: &'static str, address: Address },
    ExchangeSetOnAgreement(Address),
    AgreementSetOnExchange(Address),
    WhitelistedOnExchange(Address),
    WhitelistedOnAgreement(Address),
    ProducerDesignated(Address),
    ConsumerDesignated(Address),
}

/// Setup aborted at `step`.
#[derive(Debug, Error)]
#[error("Setup failed at {step}: {source}")]
pub struct SetupError {
    pub step: String,
    pub completed: Vec<SetupStep>,
    #[source]
    pub source: GridError,
}

/// The three clients, bound or not.
#[derive(Clone)]
pub struct GridClients {
    pub registry: DeviceRegistryClient,
    pub exchange: ExchangeClient,
    pub operators: OperatorsAgreementClient,
}

impl GridClients {
    /// Clients bound to whichever addresses the configuration provides.
    ///
    /// Missing addresses leave the client unbound; its operations then fail
    /// with `InvalidConfiguration`.
    pub fn from_config(ctx: ClientContext, contracts: &ContractsConfig) -> GridResult<Self> {
        let registry = match parse_address(DEVICE_REGISTRY, &contracts.device_registry)? {
            Some(address) => DeviceRegistryClient::at(ctx.clone(), address)?,
            None => DeviceRegistryClient::new(ctx.clone()),
        };
        let exchange = match parse_address(MICROGRID_EXCHANGE, &contracts.exchange)? {
            Some(address) => ExchangeClient::at(ctx.clone(), address)?,
            None => ExchangeClient::new(ctx.clone()),
        };
        let operators = match parse_address(OPERATORS_AGREEMENT, &contracts.operators_agreement)? {
            Some(address) => OperatorsAgreementClient::at(ctx, address)?,
            None => OperatorsAgreementClient::new(ctx),
        };
        Ok(Self {
            registry,
            exchange,
            operators,
        })
    }

    /// The same clients, sending from `account`.
    pub fn acting_as(&self, account: Address) -> Self {
        Self {
            registry: self.registry.acting_as(account),
            exchange: self.exchange.acting_as(account),
            operators: self.operators.acting_as(account),
        }
    }
}

fn parse_address(contract: &str, value: &Option<String>) -> GridResult<Option<Address>> {
    value
        .as_deref()
        .map(|s| {
            s.parse::<Address>().map_err(|e| {
                GridError::InvalidConfiguration(format!("invalid {} address '{}': {}", contract, s, e))
            })
        })
        .transpose()
}

/// Runs the full setup sequence against fresh deployments.
pub struct GridSetup<'a> {
    ctx: ClientContext,
    artifacts: &'a dyn ArtifactSource,
}

struct Progress {
    completed: Vec<SetupStep>,
}

impl Progress {
    fn record<T>(&mut self, step: &str, result: GridResult<T>) -> Result<T, SetupError> {
        result.map_err(|source| {
            tracing::error!(step, error = %source, completed = self.completed.len(), "Setup step failed");
            SetupError {
                step: step.to_string(),
                completed: self.completed.clone(),
                source,
            }
        })
    }

    fn done(&mut self, step: SetupStep) {
        tracing::info!(step = ?step, "Setup step completed");
        self.completed.push(step);
    }
}

impl<'a> GridSetup<'a> {
    pub fn new(ctx: ClientContext, artifacts: &'a dyn ArtifactSource) -> Self {
        Self { ctx, artifacts }
    }

    /// Deploy, wire and enrol. Stops at the first failure.
    pub async fn run(&self, plan: &SetupPlan) -> Result<(GridClients, Vec<SetupStep>), SetupError> {
        let mut progress = Progress {
            completed: Vec::new(),
        };

        let mut registry = DeviceRegistryClient::new(self.ctx.clone());
        let artifact = progress.record("load DeviceRegistry", self.artifacts.load(DEVICE_REGISTRY))?;
        let binding = progress.record("deploy DeviceRegistry", registry.deploy(&artifact).await)?;
        progress.done(SetupStep::Deployed {
            contract: DEVICE_REGISTRY,
            address: binding.address,
        });

        let mut exchange = ExchangeClient::new(self.ctx.clone());
        let artifact = progress.record("load MicrogridExchange", self.artifacts.load(MICROGRID_EXCHANGE))?;
        let exchange_binding = progress.record("deploy MicrogridExchange", exchange.deploy(&artifact).await)?;
        progress.done(SetupStep::Deployed {
            contract: MICROGRID_EXCHANGE,
            address: exchange_binding.address,
        });

        let mut operators = OperatorsAgreementClient::new(self.ctx.clone());
        let artifact = progress.record("load OperatorsAgreement", self.artifacts.load(OPERATORS_AGREEMENT))?;
        let agreement_binding =
            progress.record("deploy OperatorsAgreement", operators.deploy(&artifact).await)?;
        progress.done(SetupStep::Deployed {
            contract: OPERATORS_AGREEMENT,
            address: agreement_binding.address,
        });

        progress.record(
            "OperatorsAgreement.setExchange",
            operators.set_exchange_address(exchange_binding.address).await,
        )?;
        progress.done(SetupStep::ExchangeSetOnAgreement(exchange_binding.address));

        progress.record(
            "MicrogridExchange.setOperatorsAgreement",
            exchange
                .set_operators_agreement_address(agreement_binding.address)
                .await,
        )?;
        progress.done(SetupStep::AgreementSetOnExchange(agreement_binding.address));

        for &asset in &plan.assets {
            progress.record(
                &format!("MicrogridExchange.whitelistAsset({})", asset),
                exchange.whitelist_asset(asset).await,
            )?;
            progress.done(SetupStep::WhitelistedOnExchange(asset));

            progress.record(
                &format!("OperatorsAgreement.whitelistAsset({})", asset),
                operators.whitelist_asset(asset).await,
            )?;
            progress.done(SetupStep::WhitelistedOnAgreement(asset));
        }

        for &producer in &plan.producers {
            progress.record(
                &format!("DeviceRegistry.designateProducer({})", producer),
                registry.designate_producer(producer).await,
            )?;
            progress.done(SetupStep::ProducerDesignated(producer));
        }

        for &consumer in &plan.consumers {
            progress.record(
                &format!("DeviceRegistry.designateConsumer({})", consumer),
                registry.designate_consumer(consumer).await,
            )?;
            progress.done(SetupStep::ConsumerDesignated(consumer));
        }

        Ok((
            GridClients {
                registry,
                exchange,
                operators,
            },
            progress.completed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let ok = parse_address("x", &Some("0x0000000000000000000000000000000000000001".into())).unwrap();
        assert_eq!(ok, Some(Address::with_last_byte(1)));
        assert_eq!(parse_address("x", &None).unwrap(), None);
        assert!(matches!(
            parse_address("x", &Some("0xzz".into())),
            Err(GridError::InvalidConfiguration(_))
        ));
    }
}
