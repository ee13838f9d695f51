//! Ledger integration subsystem.
//!
//! # Data Flow
//! ```text
//! TransactionRequest
//!     → submitter.rs (broadcast with transport retries, receipt polling)
//!     → client.rs (LedgerClient: rpc.rs against a node, memory.rs in-process)
//!     → TransactionReceipt | GridError
//!
//! Exchange ValidationRequested logs
//!     → client.rs subscribe_events → EventStream → pipeline
//! ```
//!
//! # Constraints
//! - All RPC calls have configurable timeouts
//! - A transaction hash, once obtained, is never resubmitted

pub mod client;
pub mod memory;
pub mod rpc;
pub mod submitter;
pub mod types;

pub use client::{EventStream, LedgerClient, VALIDATION_REQUESTED};
pub use memory::InMemoryLedger;
pub use rpc::RpcLedger;
pub use submitter::TransactionSubmitter;
pub use types::{
    ChainId, EventId, LedgerError, TransactionReceipt, TransactionRequest, TxStatus,
    ValidationEvent,
};
