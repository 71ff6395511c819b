//! Shared utilities and types for the detonation orchestrator

// Re-export common dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
pub use uuid;

pub mod crypto;
pub mod observability;
pub mod types;

pub use types::error::{ErrorKind, OrchestratorError, OrchestratorResult};
