use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which telemetry field a whitelist rule is tested against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Process,
    Domain,
    Ip,
    Registry,
}

impl RuleType {
    pub const ALL: [RuleType; 4] = [RuleType::Process, RuleType::Domain, RuleType::Ip, RuleType::Registry];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Process => "process",
            RuleType::Domain => "domain",
            RuleType::Ip => "ip",
            RuleType::Registry => "registry",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pattern that marks matching telemetry rows as benign noise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl WhitelistRule {
    /// Case-insensitive substring rule
    pub fn literal(rule_type: RuleType, value: impl Into<String>, description: impl Into<String>) -> Self {
        Self::build(rule_type, value.into(), description.into(), false)
    }

    /// Unanchored regex rule
    pub fn regex(rule_type: RuleType, pattern: impl Into<String>, description: impl Into<String>) -> Self {
        Self::build(rule_type, pattern.into(), description.into(), true)
    }

    fn build(rule_type: RuleType, value: String, description: String, is_regex: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rule_type,
            value,
            description,
            is_regex,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Benign Windows activity seeded into an empty rule store.
pub fn default_rules() -> Vec<WhitelistRule> {
    let processes = [
        ("svchost.exe", "Windows Service Host Process"),
        ("explorer.exe", "Windows Explorer"),
        ("dwm.exe", "Desktop Window Manager"),
        ("csrss.exe", "Client Server Runtime Process"),
        ("lsass.exe", "Local Security Authority Process"),
        ("winlogon.exe", "Windows Logon Process"),
        ("services.exe", "Services Control Manager"),
        ("taskhostw.exe", "Host Process for Windows Tasks"),
        ("RuntimeBroker.exe", "Runtime Broker"),
    ];

    let mut rules: Vec<WhitelistRule> = processes
        .iter()
        .map(|(name, desc)| WhitelistRule::literal(RuleType::Process, *name, *desc))
        .collect();

    // Disabled by default.
    rules.push(
        WhitelistRule::literal(
            RuleType::Registry,
            r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Run",
            "Windows startup registry key",
        )
        .disabled(),
    );

    rules.push(WhitelistRule::literal(RuleType::Domain, "microsoft.com", "Microsoft official domain"));
    rules.push(WhitelistRule::literal(RuleType::Domain, "windows.com", "Windows official domain"));
    rules.push(WhitelistRule::literal(RuleType::Domain, "windowsupdate.com", "Windows Update domain"));

    rules.push(WhitelistRule::regex(RuleType::Ip, r"^127\..*", "Localhost addresses"));
    rules.push(WhitelistRule::regex(RuleType::Ip, r"^192\.168\..*", "Private network range 192.168.x.x"));
    rules.push(WhitelistRule::regex(RuleType::Ip, r"^10\..*", "Private network range 10.x.x.x"));

    rules
}
