use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::OrchestratorResult;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{AnalysisReport, CategoryCounts, RuleType, WhitelistRule};
use crate::storage::RuleStore;

/// A single compiled rule pattern
#[derive(Debug, Clone)]
enum Matcher {
    /// Unanchored search
    Pattern(Regex),
    /// Lowercased needle for case-insensitive containment
    Literal(String),
}

impl Matcher {
    fn compile(rule: &WhitelistRule) -> Result<Self, regex::Error> {
        if rule.is_regex {
            Regex::new(&rule.value).map(Matcher::Pattern)
        } else {
            Ok(Matcher::Literal(rule.value.to_lowercase()))
        }
    }

    fn is_match(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        match self {
            Matcher::Pattern(re) => re.is_match(candidate),
            Matcher::Literal(needle) => candidate.to_lowercase().contains(needle.as_str()),
        }
    }
}

/// Enabled rules compiled and grouped by type
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    by_type: HashMap<RuleType, Vec<Matcher>>,
    skipped: usize,
}

impl RuleIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile `rules`. Disabled rules are ignored; rules whose regex does not
    /// compile are logged and skipped.
    pub fn build(rules: &[WhitelistRule]) -> Self {
        let mut index = Self::default();

        for rule in rules.iter().filter(|r| r.enabled) {
            match Matcher::compile(rule) {
                Ok(matcher) => index.by_type.entry(rule.rule_type).or_default().push(matcher),
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        rule_type = %rule.rule_type,
                        pattern = %rule.value,
                        "Skipping whitelist rule with invalid regex: {}",
                        e
                    );
                    index.skipped += 1;
                }
            }
        }

        index
    }

    pub fn matches(&self, rule_type: RuleType, candidate: &str) -> bool {
        self.by_type
            .get(&rule_type)
            .map_or(false, |matchers| matchers.iter().any(|m| m.is_match(candidate)))
    }

    pub fn rule_count(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn rules_of(&self, rule_type: RuleType) -> usize {
        self.by_type.get(&rule_type).map_or(0, Vec::len)
    }

    /// Rules dropped at compile time
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Drop every row a rule matches. Row order is preserved.
    pub fn apply(&self, report: &AnalysisReport) -> (AnalysisReport, FilterStats) {
        let before = report.counts();

        let process_activity = report
            .process_activity
            .iter()
            .filter(|p| !self.matches(RuleType::Process, &p.process_name))
            .cloned()
            .collect();

        let file_system = report
            .file_system
            .iter()
            .filter(|f| !self.matches(RuleType::Process, &f.process_name))
            .cloned()
            .collect();

        let registry = report
            .registry
            .iter()
            .filter(|r| {
                !(self.matches(RuleType::Process, &r.process_name) || self.matches(RuleType::Registry, &r.path))
            })
            .cloned()
            .collect();

        let network = report
            .network
            .iter()
            .filter(|n| !self.matches_host(&n.remote_addr))
            .cloned()
            .collect();

        let unique_hosts = report
            .unique_hosts
            .iter()
            .filter(|h| !self.matches_host(h))
            .cloned()
            .collect();

        let filtered = AnalysisReport {
            summary: report.summary.clone(),
            process_activity,
            file_system,
            registry,
            network,
            unique_hosts,
        };

        let stats = FilterStats {
            before,
            after: filtered.counts(),
        };
        (filtered, stats)
    }

    fn matches_host(&self, addr: &str) -> bool {
        let host = extract_host(addr);
        self.matches(RuleType::Ip, host) || self.matches(RuleType::Domain, host)
    }
}

/// Host portion of an address with any trailing `:port` removed.
///
/// Handles `host:port`, `[v6]:port` and bare IPv6 literals (several colons,
/// no brackets), which are returned unchanged.
pub fn extract_host(addr: &str) -> &str {
    let addr = addr.trim();

    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => addr,
        };
    }

    if addr.matches(':').count() > 1 {
        return addr;
    }

    match addr.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => addr,
    }
}

/// Row counts before and after a filter pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub before: CategoryCounts,
    pub after: CategoryCounts,
}

impl FilterStats {
    pub fn removed(&self) -> usize {
        self.before.total().saturating_sub(self.after.total())
    }
}

/// Drops benign telemetry from reports using rules read from a `RuleStore`.
///
/// Rules are reloaded before every pass. If the reload fails the last index
/// that loaded successfully keeps being used.
pub struct WhitelistFilter {
    store: Arc<dyn RuleStore>,
    last_good: RwLock<Arc<RuleIndex>>,
}

impl WhitelistFilter {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            last_good: RwLock::new(Arc::new(RuleIndex::empty())),
        }
    }

    /// Re-read enabled rules and replace the index. On error the previous
    /// index is left untouched.
    pub async fn reload(&self) -> OrchestratorResult<usize> {
        let rules = self.store.enabled_rules().await?;
        let index = RuleIndex::build(&rules);
        let count = index.rule_count();

        debug!(
            rules = count,
            skipped = index.skipped(),
            process = index.rules_of(RuleType::Process),
            domain = index.rules_of(RuleType::Domain),
            ip = index.rules_of(RuleType::Ip),
            registry = index.rules_of(RuleType::Registry),
            "Whitelist rules reloaded"
        );

        *self.last_good.write().await = Arc::new(index);
        Ok(count)
    }

    pub async fn current_index(&self) -> Arc<RuleIndex> {
        self.last_good.read().await.clone()
    }

    /// Reload, then filter `report`
    pub async fn filter_report(&self, report: &AnalysisReport) -> (AnalysisReport, FilterStats) {
        if let Err(e) = self.reload().await {
            warn!("Failed to reload whitelist rules, using last good set: {}", e);
        }

        let index = self.current_index().await;
        let (filtered, stats) = index.apply(report);

        info!(
            processes_before = stats.before.processes,
            processes_after = stats.after.processes,
            files_before = stats.before.files,
            files_after = stats.after.files,
            registry_before = stats.before.registry,
            registry_after = stats.after.registry,
            network_before = stats.before.network,
            network_after = stats.after.network,
            hosts_before = stats.before.hosts,
            hosts_after = stats.after.hosts,
            "Whitelist filter removed {} events",
            stats.removed()
        );

        (filtered, stats)
    }
}
