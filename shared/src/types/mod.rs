//! Shared type definitions
//!
//! Only error kinds live here today; domain models belong to the engine crate.

pub mod error;

pub use error::{ErrorKind, OrchestratorError, OrchestratorResult};
