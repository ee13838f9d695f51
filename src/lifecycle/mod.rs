//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → stop consuming events → drain in-flight claims → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Shutdown has timeout: in-flight claims are abandoned after the drain deadline
//! - Abandoned claims stay in the journal for reconciliation on restart

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownListener};
