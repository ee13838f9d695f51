//! Validation pipeline.
//!
//! # Data Flow
//! ```text
//! Exchange ValidationRequested logs
//!     → monitor.rs (subscribe, dedupe via journal, bounded worker pool)
//!     → processor.rs (policy check, approveMint, confirmation, retries)
//!     → journal.rs (eventId → outcome, persisted)
//! ```
//!
//! # Guarantees
//! - At most one `approveMint` transaction per event id
//! - Work still in flight at shutdown is drained, or left journaled and
//!   reconciled on the next start

pub mod journal;
pub mod monitor;
pub mod policy;
pub mod processor;
pub mod types;

pub use journal::{ClaimJournal, JournalSummary};
pub use monitor::{PipelineReport, ValidationPipeline};
pub use policy::{AcceptAll, CapacityPolicy, ValidationPolicy};
pub use processor::{ClaimProcessor, ClaimRetry, ReconcileReport};
pub use types::{ClaimFailure, ClaimRecord, ClaimState};
