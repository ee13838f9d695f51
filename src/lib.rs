//! Microgrid marketplace orchestration library.

pub mod admin;
pub mod config;
pub mod contracts;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resilience;

pub use config::schema::GridConfig;
pub use error::{GridError, GridResult};
pub use lifecycle::Shutdown;
pub use pipeline::ValidationPipeline;
