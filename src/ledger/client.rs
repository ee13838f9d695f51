//! The surface this crate consumes from a ledger node.

use alloy::primitives::{Address, Bytes, TxHash};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::ledger::types::{LedgerResult, TransactionReceipt, ValidationEvent};

/// Name of the Exchange event that asks for production to be validated.
pub const VALIDATION_REQUESTED: &str = "ValidationRequested";

/// Live, possibly infinite, sequence of validation requests.
///
/// Transport errors are yielded as items; the stream continues after them.
pub type EventStream = BoxStream<'static, LedgerResult<ValidationEvent>>;

/// Connection to a ledger node.
///
/// Writes return a transaction hash as soon as the node accepts them into its
/// pending pool. Their outcome is observed separately through
/// [`LedgerClient::get_receipt`].
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Accounts managed by the node, coinbase first.
    async fn accounts(&self) -> LedgerResult<Vec<Address>>;

    /// Submit a contract creation transaction.
    async fn deploy(&self, from: Address, bytecode: Bytes, gas_limit: u64) -> LedgerResult<TxHash>;

    /// Execute a read-only call against current state. No transaction is sent.
    async fn call(&self, to: Address, data: Bytes) -> LedgerResult<Bytes>;

    /// Submit a state-changing transaction.
    async fn transact(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        gas_limit: u64,
    ) -> LedgerResult<TxHash>;

    /// Current status of a previously submitted transaction.
    async fn get_receipt(&self, tx_hash: TxHash) -> LedgerResult<TransactionReceipt>;

    /// Subscribe to `event` emitted by `contract`.
    ///
    /// With `from_block`, logs from that block onward are delivered first,
    /// followed by new ones. Without it, only events after the current head.
    async fn subscribe_events(
        &self,
        contract: Address,
        event: &str,
        from_block: Option<u64>,
    ) -> LedgerResult<EventStream>;

    /// Whether the node currently answers requests.
    async fn is_healthy(&self) -> bool {
        self.accounts().await.is_ok()
    }
}
