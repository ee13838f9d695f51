//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from a TOML file.
//! Every field has a default so a minimal file only names what differs.

use serde::{Deserialize, Serialize};

/// Gas limit attached to every transaction unless configured otherwise.
pub const DEFAULT_GAS_LIMIT: u64 = 5_000_000;

/// Placeholder admin key that must be replaced before enabling the admin API.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GridConfig {
    /// Node connection settings.
    pub ledger: LedgerConfig,

    /// Transaction submission bounds.
    pub submitter: SubmitterConfig,

    /// Validation pipeline settings.
    pub pipeline: PipelineConfig,

    /// Deployed contract addresses and artifact location.
    pub contracts: ContractsConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,
}

/// Ledger node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 31337 for a local Anvil node).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Blocks a log must be buried under before it is delivered.
    pub confirmation_blocks: u32,

    /// Interval between log polls in milliseconds.
    pub poll_interval_ms: u64,

    /// Sending account. Defaults to the node's first account.
    pub sender: Option<String>,

    /// Gas limit for every transaction.
    pub gas_limit: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 31337,
            rpc_timeout_secs: 10,
            confirmation_blocks: 1,
            poll_interval_ms: 2000,
            sender: None,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

/// Submission retry and confirmation bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmitterConfig {
    /// Transport-level attempts before giving up with no hash.
    pub max_attempts: u32,

    /// First backoff delay in milliseconds.
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,

    /// Maximum time to wait for a receipt in seconds.
    pub max_wait_secs: u64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            max_wait_secs: 60,
        }
    }
}

/// Validation pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,

    /// Claims processed concurrently.
    pub max_workers: usize,

    /// Retries of a claim after a timeout or submission failure.
    pub max_retries: u32,

    /// Base delay between claim retries in milliseconds.
    pub retry_base_ms: u64,

    /// Cap on the delay between claim retries in milliseconds.
    pub retry_max_ms: u64,

    /// Idempotency journal file. In-memory only when unset.
    pub journal_path: Option<String>,

    /// Time allowed for in-flight claims to finish on shutdown, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 8,
            max_retries: 3,
            retry_base_ms: 1000,
            retry_max_ms: 30_000,
            journal_path: None,
            drain_timeout_secs: 30,
        }
    }
}

/// Deployed contract addresses (hex) and compiled artifact directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub device_registry: Option<String>,
    pub exchange: Option<String>,
    pub operators_agreement: Option<String>,

    /// Directory of `<Contract>.json` build artifacts.
    pub artifacts_dir: String,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            device_registry: None,
            exchange: None,
            operators_agreement: None,
            artifacts_dir: "build/contracts".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
