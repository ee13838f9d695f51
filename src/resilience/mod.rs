//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transaction submission:
//!     → retries.rs (RetryPolicy: attempts, confirmation deadline)
//!     → backoff.rs (delay between attempts and between receipt polls)
//! ```
//!
//! # Design Decisions
//! - Every wait has a deadline; nothing polls forever
//! - Only failures that left no trace on the ledger are resubmitted
//! - Jittered backoff spreads retries from concurrent claim workers

pub mod backoff;
pub mod retries;

pub use retries::RetryPolicy;
