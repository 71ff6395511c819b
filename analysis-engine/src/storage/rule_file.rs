use std::path::PathBuf;

use async_trait::async_trait;
use shared::{OrchestratorError, OrchestratorResult};
use tracing::debug;

use super::RuleStore;
use crate::models::WhitelistRule;

/// Whitelist rules kept in a JSON array on disk.
///
/// The file is read on every call so edits are picked up by the next filter
/// pass without restarting.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    path: PathBuf,
}

impl FileRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Every rule in the file, enabled or not
    pub async fn load_all(&self) -> OrchestratorResult<Vec<WhitelistRule>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            OrchestratorError::Storage(format!("failed to read rule file {}: {}", self.path.display(), e))
        })?;

        let rules: Vec<WhitelistRule> = serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::Storage(format!("invalid rule file {}: {}", self.path.display(), e))
        })?;

        debug!("Read {} whitelist rules from {}", rules.len(), self.path.display());
        Ok(rules)
    }

    pub async fn save_all(&self, rules: &[WhitelistRule]) -> OrchestratorResult<()> {
        let content = serde_json::to_string_pretty(rules)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    async fn enabled_rules(&self) -> OrchestratorResult<Vec<WhitelistRule>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .collect())
    }
}
