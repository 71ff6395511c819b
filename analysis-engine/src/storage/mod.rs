/// Storage seam for submissions and whitelist rules
///
/// The orchestrator does not own persistence. It consumes it through two narrow
/// traits:
/// - `SubmissionStore`: content-addressed submission records
/// - `RuleStore`: the enabled whitelist rules, re-read on every filter pass
///
/// `MemoryStore` implements both and backs the CLI and the tests;
/// `FileRuleStore` reads rules from a JSON file.

pub mod memory;
pub mod rule_file;

pub use memory::MemoryStore;
pub use rule_file::FileRuleStore;

use async_trait::async_trait;
use shared::OrchestratorResult;
use uuid::Uuid;

use crate::models::{AnalysisReport, Submission, WhitelistRule};

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a new record. Fails if the hash is already present.
    async fn create_submission(&self, submission: &Submission) -> OrchestratorResult<()>;

    /// `Ok(None)` when the hash has never been seen
    async fn get_submission_by_hash(&self, hash: &str) -> OrchestratorResult<Option<Submission>>;

    async fn get_submission(&self, id: Uuid) -> OrchestratorResult<Option<Submission>>;

    /// Attach the filtered report and mark the record completed
    async fn update_submission_report(&self, id: Uuid, report: &AnalysisReport) -> OrchestratorResult<()>;

    /// Record the failure and mark the record errored
    async fn update_submission_error(&self, id: Uuid, message: &str) -> OrchestratorResult<()>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn enabled_rules(&self) -> OrchestratorResult<Vec<WhitelistRule>>;
}
