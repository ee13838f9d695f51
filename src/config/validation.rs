//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, backoff base ≤ cap)
//! - Check URLs and addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GridConfig → Result<(), Vec<ValidationError>>

use alloy::primitives::Address;

use crate::config::schema::{GridConfig, PLACEHOLDER_API_KEY};

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &GridConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &'static str, message: String| errors.push(ValidationError { field, message });

    if let Err(e) = config.ledger.rpc_url.parse::<url::Url>() {
        fail("ledger.rpc_url", format!("invalid URL '{}': {}", config.ledger.rpc_url, e));
    }
    for failover in &config.ledger.failover_urls {
        if failover.parse::<url::Url>().is_err() {
            fail("ledger.failover_urls", format!("invalid URL '{}'", failover));
        }
    }
    if config.ledger.rpc_timeout_secs == 0 {
        fail("ledger.rpc_timeout_secs", "must be greater than 0".into());
    }
    if config.ledger.poll_interval_ms == 0 {
        fail("ledger.poll_interval_ms", "must be greater than 0".into());
    }
    if config.ledger.gas_limit == 0 {
        fail("ledger.gas_limit", "must be greater than 0".into());
    }
    if let Some(sender) = &config.ledger.sender {
        if sender.parse::<Address>().is_err() {
            fail("ledger.sender", format!("invalid address '{}'", sender));
        }
    }

    if config.submitter.max_attempts == 0 {
        fail("submitter.max_attempts", "must be at least 1".into());
    }
    if config.submitter.initial_backoff_ms > config.submitter.max_backoff_ms {
        fail(
            "submitter.initial_backoff_ms",
            "must not exceed submitter.max_backoff_ms".into(),
        );
    }
    if config.submitter.max_wait_secs == 0 {
        fail("submitter.max_wait_secs", "must be greater than 0".into());
    }

    if config.pipeline.max_workers == 0 {
        fail("pipeline.max_workers", "must be at least 1".into());
    }
    if config.pipeline.retry_base_ms > config.pipeline.retry_max_ms {
        fail("pipeline.retry_base_ms", "must not exceed pipeline.retry_max_ms".into());
    }

    for (field, value) in [
        ("contracts.device_registry", &config.contracts.device_registry),
        ("contracts.exchange", &config.contracts.exchange),
        ("contracts.operators_agreement", &config.contracts.operators_agreement),
    ] {
        if let Some(address) = value {
            if address.parse::<Address>().is_err() {
                fail(field, format!("invalid address '{}'", address));
            }
        }
    }
    if config.pipeline.enabled && config.contracts.exchange.is_none() {
        fail("contracts.exchange", "required when the pipeline is enabled".into());
    }

    if config.admin.enabled {
        if config.admin.api_key == PLACEHOLDER_API_KEY || config.admin.api_key.is_empty() {
            fail("admin.api_key", "set a real key before enabling the admin API".into());
        }
        if config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
            fail("admin.bind_address", format!("invalid socket address '{}'", config.admin.bind_address));
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        fail(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
