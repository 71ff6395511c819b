use std::collections::HashMap;

use async_trait::async_trait;
use shared::{OrchestratorError, OrchestratorResult};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{RuleStore, SubmissionStore};
use crate::models::{default_rules, AnalysisReport, Submission, WhitelistRule};

/// Process-local store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    submissions: RwLock<HashMap<Uuid, Submission>>,
    rules: RwLock<Vec<WhitelistRule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<WhitelistRule>) -> Self {
        Self {
            submissions: RwLock::new(HashMap::new()),
            rules: RwLock::new(rules),
        }
    }

    /// Seed the default rule set if no rules exist. Returns how many were added.
    pub async fn seed_default_rules(&self) -> usize {
        let mut rules = self.rules.write().await;
        if !rules.is_empty() {
            debug!("Whitelist rules already present, skipping seed");
            return 0;
        }
        *rules = default_rules();
        info!("Seeded {} default whitelist rules", rules.len());
        rules.len()
    }

    /// Toggle a rule; returns false if the id is unknown
    pub async fn set_rule_enabled(&self, id: Uuid, enabled: bool) -> bool {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                rule.updated_at = chrono::Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn all_rules(&self) -> Vec<WhitelistRule> {
        self.rules.read().await.clone()
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.read().await.len()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create_submission(&self, submission: &Submission) -> OrchestratorResult<()> {
        let mut submissions = self.submissions.write().await;
        if submissions
            .values()
            .any(|s| s.file_hash_sha256 == submission.file_hash_sha256)
        {
            return Err(OrchestratorError::Storage(format!(
                "submission for hash {} already exists",
                submission.file_hash_sha256
            )));
        }
        submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get_submission_by_hash(&self, hash: &str) -> OrchestratorResult<Option<Submission>> {
        Ok(self
            .submissions
            .read()
            .await
            .values()
            .find(|s| s.file_hash_sha256 == hash)
            .cloned())
    }

    async fn get_submission(&self, id: Uuid) -> OrchestratorResult<Option<Submission>> {
        Ok(self.submissions.read().await.get(&id).cloned())
    }

    async fn update_submission_report(&self, id: Uuid, report: &AnalysisReport) -> OrchestratorResult<()> {
        let mut submissions = self.submissions.write().await;
        let submission = submissions
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::Storage(format!("submission {} not found", id)))?;
        submission.complete(report.clone());
        Ok(())
    }

    async fn update_submission_error(&self, id: Uuid, message: &str) -> OrchestratorResult<()> {
        let mut submissions = self.submissions.write().await;
        let submission = submissions
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::Storage(format!("submission {} not found", id)))?;
        submission.fail(message);
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn enabled_rules(&self) -> OrchestratorResult<Vec<WhitelistRule>> {
        Ok(self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }
}
