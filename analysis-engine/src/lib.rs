//! Detonation orchestration
//!
//! Restores a virtual environment to a clean snapshot, hands a sample to the
//! in-guest analysis agent, powers the environment down and strips benign
//! noise from the returned behavioural report.

pub mod analyzers;
pub mod config;
pub mod models;
pub mod sandbox;
pub mod storage;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::analyzers::{DynamicAnalyzer, DynamicAnalyzerConfig};
use crate::config::Config;
use crate::models::default_rules;
use crate::sandbox::{AgentClient, ProxmoxController};
use crate::storage::{FileRuleStore, MemoryStore, RuleStore};

/// Wire up a `DynamicAnalyzer` from configuration.
///
/// Submissions live in memory. Rules come from `WHITELIST_FILE` when set
/// (created with the default rules if missing and seeding is on), otherwise
/// from memory.
pub async fn build_analyzer(config: &Config) -> Result<DynamicAnalyzer> {
    let submissions = Arc::new(MemoryStore::new());

    let rules: Arc<dyn RuleStore> = match &config.rules.whitelist_file {
        Some(path) => {
            let store = FileRuleStore::new(path);
            if config.rules.seed_defaults && !tokio::fs::try_exists(path).await.unwrap_or(false) {
                store
                    .save_all(&default_rules())
                    .await
                    .with_context(|| format!("Failed to seed whitelist file {}", path.display()))?;
                info!("Wrote default whitelist rules to {}", path.display());
            }
            Arc::new(store)
        }
        None => {
            if config.rules.seed_defaults {
                submissions.seed_default_rules().await;
            }
            submissions.clone()
        }
    };

    let mut analyzer = DynamicAnalyzer::new(DynamicAnalyzerConfig::from_config(config), submissions, rules);

    if config.agent.enabled {
        let agent = AgentClient::new(config.agent.url.clone(), config.agent.timeout())
            .context("Failed to create agent client")?;
        analyzer = analyzer.with_agent(agent);
    } else {
        info!("Agent integration disabled; detonations return empty reports");
    }

    if config.environment.enabled {
        let controller = ProxmoxController::new(config.environment.proxmox_config()?)
            .context("Failed to create environment controller")?;
        analyzer = analyzer.with_controller(Arc::new(controller));
    }

    Ok(analyzer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_offline_build_seeds_memory_rules() {
        let analyzer = build_analyzer(&Config::default()).await.unwrap();
        assert!(analyzer.agent().is_none());
        assert!(analyzer.controller().is_none());
        assert!(analyzer.filter().reload().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_rule_file_is_seeded_when_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("whitelist.json");
        let mut config = Config::default();
        config.rules.whitelist_file = Some(path.clone());

        let analyzer = build_analyzer(&config).await.unwrap();
        assert!(path.exists());
        let enabled = default_rules().iter().filter(|r| r.enabled).count();
        assert_eq!(analyzer.filter().reload().await.unwrap(), enabled);
    }

    #[tokio::test]
    async fn test_environment_without_credentials_fails() {
        let mut config = Config::default();
        config.environment.enabled = true;
        assert!(build_analyzer(&config).await.is_err());
    }
}
