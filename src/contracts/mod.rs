//! Clients for the on-chain marketplace contracts.
//!
//! # Data Flow
//! ```text
//! ArtifactSource (compiled contract)
//!     → binding.rs (ContractHandle: deploy / attach, call, transact)
//!     → registry.rs | exchange.rs | operators.rs (typed operations)
//!     → setup.rs (ordered deployment and wiring)
//! ```
//!
//! # Design Decisions
//! - Contracts reference each other by address only
//! - Role and whitelist rules are enforced on-chain; clients forward and report
//! - An operation on an unbound client fails before anything is sent

pub mod abi;
pub mod binding;
pub mod exchange;
pub mod operators;
pub mod registry;
pub mod setup;

pub use binding::{ArtifactDir, ArtifactSource, ClientContext, ContractArtifact, ContractBinding};
pub use exchange::ExchangeClient;
pub use operators::OperatorsAgreementClient;
pub use registry::{DeviceRecord, DeviceRegistryClient};
pub use setup::{GridClients, GridSetup, SetupPlan, SetupStep};

/// Contract names, as used for artifacts and log fields.
pub const DEVICE_REGISTRY: &str = "DeviceRegistry";
pub const MICROGRID_EXCHANGE: &str = "MicrogridExchange";
pub const OPERATORS_AGREEMENT: &str = "OperatorsAgreement";
