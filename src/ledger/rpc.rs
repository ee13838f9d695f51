//! JSON-RPC ledger client with timeout and failover handling.
//!
//! # Responsibilities
//! - Connect to the primary and failover JSON-RPC endpoints
//! - Forward reads, writes and receipt lookups with per-call deadlines
//! - Turn `ValidationRequested` logs into a polled event stream

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::Filter;
use alloy::rpc::types::TransactionRequest as RpcTransactionRequest;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::config::schema::LedgerConfig;
use crate::contracts::abi::IMicrogridExchange::ValidationRequested;
use crate::ledger::client::{EventStream, LedgerClient, VALIDATION_REQUESTED};
use crate::ledger::types::{
    ChainId, EventId, LedgerError, LedgerResult, TransactionReceipt, TxStatus, ValidationEvent,
};
use crate::observability::metrics;

/// Widest block range requested in one `eth_getLogs` call while catching up.
const MAX_LOG_RANGE: u64 = 2_000;

/// Ledger client backed by one or more JSON-RPC nodes.
#[derive(Clone)]
pub struct RpcLedger {
    /// List of providers (primary + failovers).
    providers: Vec<Arc<dyn Provider + Send + Sync>>,
    config: LedgerConfig,
    timeout_duration: Duration,
}

impl RpcLedger {
    /// Create a new client.
    ///
    /// Fails only on a malformed primary URL. An unreachable node is logged
    /// and left to surface on first use.
    pub async fn new(config: LedgerConfig) -> LedgerResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            LedgerError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(
            Arc::new(ProviderBuilder::new().connect_http(primary_url)) as Arc<dyn Provider + Send + Sync>
        );

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(
                    Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>
                );
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let client = Self {
            providers,
            config: config.clone(),
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %config.rpc_url,
                    chain_id = config.chain_id,
                    "Ledger client initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Ledger client initialized but chain verification failed"
                );
            }
        }

        Ok(client)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> LedgerResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id.0 != self.config.chain_id {
            return Err(LedgerError::ChainMismatch {
                expected: self.config.chain_id,
                actual: chain_id.0,
            });
        }
        Ok(())
    }

    /// Get the chain ID from the RPC.
    pub async fn get_chain_id(&self) -> LedgerResult<ChainId> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.get_chain_id()).await {
                Ok(Ok(result)) => return Ok(ChainId(result)),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider");
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, "RPC timeout, trying next provider");
                }
            }
        }
        Err(LedgerError::Rpc("All RPC providers failed".to_string()))
    }

    /// Get the latest block number.
    pub async fn get_block_number(&self) -> LedgerResult<u64> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.get_block_number()).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(LedgerError::Rpc("All providers failed to get block number".to_string()))
    }

    /// Decoded `ValidationRequested` logs emitted by `contract` in `from..=to`.
    async fn validation_logs(
        &self,
        contract: Address,
        from: u64,
        to: u64,
    ) -> LedgerResult<Vec<ValidationEvent>> {
        let filter = Filter::new()
            .address(contract)
            .from_block(from)
            .to_block(to)
            .event(ValidationRequested::SIGNATURE);

        let logs = match timeout(self.timeout_duration, self.providers[0].get_logs(&filter)).await {
            Ok(Ok(logs)) => logs,
            Ok(Err(e)) => return Err(LedgerError::Rpc(format!("get_logs failed: {}", e))),
            Err(_) => return Err(LedgerError::Timeout(self.config.rpc_timeout_secs)),
        };

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let (Some(tx_hash), Some(log_index)) = (log.transaction_hash, log.log_index) else {
                tracing::debug!("Skipping log without transaction position");
                continue;
            };
            match log.log_decode::<ValidationRequested>() {
                Ok(decoded) => {
                    let event = decoded.inner;
                    events.push(ValidationEvent {
                        event_id: EventId::from_log(tx_hash, log_index),
                        asset: event.asset,
                        claimed_wh: event.wattHours,
                        block_number: log.block_number.unwrap_or(to),
                    });
                }
                Err(e) => tracing::warn!(tx_hash = %tx_hash, error = %e, "Undecodable ValidationRequested log"),
            }
        }
        Ok(events)
    }

    /// Get the configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn accounts(&self) -> LedgerResult<Vec<Address>> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.get_accounts()).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(LedgerError::Rpc("All providers failed to list accounts".to_string()))
    }

    async fn deploy(&self, from: Address, bytecode: Bytes, gas_limit: u64) -> LedgerResult<TxHash> {
        let tx = RpcTransactionRequest::default()
            .with_from(from)
            .with_deploy_code(bytecode)
            .with_gas_limit(gas_limit);
        self.send(tx).await
    }

    async fn call(&self, to: Address, data: Bytes) -> LedgerResult<Bytes> {
        let tx = RpcTransactionRequest::default().with_to(to).with_input(data);
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.call(tx.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) if e.as_error_resp().is_some() => {
                    return Err(LedgerError::CallReverted(e.to_string()));
                }
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(LedgerError::Rpc("All providers failed to execute call".to_string()))
    }

    async fn transact(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        gas_limit: u64,
    ) -> LedgerResult<TxHash> {
        let tx = RpcTransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(data)
            .with_gas_limit(gas_limit);
        self.send(tx).await
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> LedgerResult<TransactionReceipt> {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, provider.get_transaction_receipt(tx_hash)).await {
                Ok(Ok(Some(receipt))) => {
                    let status = if receipt.status() {
                        TxStatus::Success
                    } else {
                        TxStatus::Reverted
                    };
                    return Ok(TransactionReceipt {
                        tx_hash,
                        status,
                        contract_address: receipt.contract_address,
                        block_number: receipt.block_number,
                    });
                }
                Ok(Ok(None)) => return Ok(TransactionReceipt::pending(tx_hash)),
                Ok(Err(e)) => tracing::warn!(provider_idx = i, error = %e, "RPC error"),
                Err(_) => tracing::warn!(provider_idx = i, "RPC timeout"),
            }
        }
        Err(LedgerError::Rpc("All providers failed to get receipt".to_string()))
    }

    async fn subscribe_events(
        &self,
        contract: Address,
        event: &str,
        from_block: Option<u64>,
    ) -> LedgerResult<EventStream> {
        if event != VALIDATION_REQUESTED {
            return Err(LedgerError::NotAvailable(format!(
                "subscriptions to '{}' are not supported",
                event
            )));
        }

        let start = match from_block {
            Some(block) => block,
            None => self.get_block_number().await?,
        };
        tracing::info!(
            contract = %contract,
            from_block = start,
            catching_up = from_block.is_some(),
            "Subscribed to validation requests"
        );

        let cursor = LogCursor {
            ledger: self.clone(),
            contract,
            next_block: start,
            buffered: VecDeque::new(),
        };
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        let stream = futures_util::stream::unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(event) = cursor.buffered.pop_front() {
                    return Some((Ok(event), cursor));
                }
                match cursor.advance().await {
                    Ok(()) if cursor.buffered.is_empty() => sleep(poll_interval).await,
                    Ok(()) => {}
                    Err(e) => {
                        sleep(poll_interval).await;
                        return Some((Err(e), cursor));
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn is_healthy(&self) -> bool {
        let healthy = self.get_block_number().await.is_ok();
        metrics::record_ledger_health(healthy);
        healthy
    }
}

impl RpcLedger {
    /// Broadcast through the primary provider only; a timed-out send may
    /// still have reached a node, so it is never replayed on a failover.
    async fn send(&self, tx: RpcTransactionRequest) -> LedgerResult<TxHash> {
        match timeout(self.timeout_duration, self.providers[0].send_transaction(tx)).await {
            Ok(Ok(pending)) => Ok(*pending.tx_hash()),
            Ok(Err(e)) => Err(LedgerError::Rpc(format!("send_transaction failed: {}", e))),
            Err(_) => Err(LedgerError::Timeout(self.config.rpc_timeout_secs)),
        }
    }
}

/// Block-range cursor for polling validation logs.
struct LogCursor {
    ledger: RpcLedger,
    contract: Address,
    next_block: u64,
    buffered: VecDeque<ValidationEvent>,
}

impl LogCursor {
    /// Fetch logs from blocks that reached the configured confirmation depth,
    /// at most [`MAX_LOG_RANGE`] blocks per call.
    async fn advance(&mut self) -> LedgerResult<()> {
        let head = self.ledger.get_block_number().await?;
        let confirmed = head.saturating_sub(self.ledger.config.confirmation_blocks as u64);
        if confirmed < self.next_block {
            return Ok(());
        }
        let target = confirmed.min(self.next_block.saturating_add(MAX_LOG_RANGE - 1));

        let events = self
            .ledger
            .validation_logs(self.contract, self.next_block, target)
            .await?;
        if !events.is_empty() {
            tracing::debug!(count = events.len(), to_block = target, "Fetched validation requests");
        }
        self.buffered.extend(events);
        self.next_block = target + 1;
        Ok(())
    }
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 31337,
            rpc_timeout_secs: 1,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_client_creation() {
        // Creation succeeds even when no node is listening.
        let result = RpcLedger::new(test_config()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_primary_url() {
        let mut config = test_config();
        config.rpc_url = "not a url".to_string();
        let result = RpcLedger::new(config).await;
        assert!(matches!(result, Err(LedgerError::Rpc(_))));
    }

    #[tokio::test]
    async fn test_unsupported_event_subscription() {
        let ledger = RpcLedger::new(test_config()).await.unwrap();
        let result = ledger.subscribe_events(Address::ZERO, "Transfer", None).await;
        assert!(matches!(result, Err(LedgerError::NotAvailable(_))));
    }
}
