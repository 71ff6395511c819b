/// Configuration module for the detonation orchestrator
///
/// All settings come from environment variables (optionally via a `.env`
/// file), grouped into:
/// - Remote agent
/// - Environment controller (Proxmox) and lifecycle timings
/// - Whitelist rule source
/// - Logging

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::observability::{LogConfig, LogFormat, LogLevel};

use crate::sandbox::{Credentials, ProxmoxConfig};

/// Variable lookup. `from_env` reads the process environment; tests pass a map.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn raw(lookup: Lookup, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn string_or(lookup: Lookup, key: &str, default: &str) -> String {
    raw(lookup, key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(lookup: Lookup, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    string_or(lookup, key, default)
        .parse()
        .with_context(|| format!("Invalid {}", key))
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub environment: EnvironmentConfig,
    pub rules: RulesConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    fn from_lookup(lookup: Lookup) -> Result<Self> {
        Ok(Self {
            agent: AgentConfig::from_lookup(lookup)?,
            environment: EnvironmentConfig::from_lookup(lookup)?,
            rules: RulesConfig::from_lookup(lookup)?,
            logging: LoggingConfig::from_lookup(lookup)?,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.environment.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Remote analysis agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// When false, detonation returns an empty report without network calls
    pub enabled: bool,
    pub url: String,
    pub timeout_seconds: u64,
}

impl AgentConfig {
    fn from_lookup(lookup: Lookup) -> Result<Self> {
        Ok(Self {
            enabled: parse_or(lookup, "AGENT_ENABLED", "false")?,
            url: string_or(lookup, "AGENT_URL", "http://localhost:9090"),
            timeout_seconds: parse_or(lookup, "AGENT_TIMEOUT_SECONDS", "300")?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            anyhow::bail!("AGENT_URL must be an http(s) URL, got {:?}", self.url);
        }
        if self.timeout_seconds == 0 {
            anyhow::bail!("AGENT_TIMEOUT_SECONDS must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:9090".to_string(),
            timeout_seconds: 300,
        }
    }
}

/// Virtual environment controller and lifecycle timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub enabled: bool,
    pub host: String,
    pub node: String,
    pub vmid: u32,
    pub token_id: Option<String>,
    #[serde(skip_serializing)]
    pub token_secret: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub verify_ssl: bool,
    pub restore_snapshot: bool,
    pub shutdown_after: bool,
    pub ready_timeout_seconds: u64,
    pub stop_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    /// Sleep between "running" and the first agent probe
    pub grace_period_seconds: u64,
}

impl EnvironmentConfig {
    fn from_lookup(lookup: Lookup) -> Result<Self> {
        Ok(Self {
            enabled: parse_or(lookup, "PROXMOX_ENABLED", "false")?,
            host: string_or(lookup, "PROXMOX_HOST", "https://proxmox.local:8006"),
            node: string_or(lookup, "PROXMOX_NODE", "pve"),
            vmid: parse_or(lookup, "PROXMOX_VMID", "100")?,
            token_id: raw(lookup, "PROXMOX_TOKEN_ID"),
            token_secret: raw(lookup, "PROXMOX_TOKEN_SECRET"),
            username: raw(lookup, "PROXMOX_USERNAME"),
            password: raw(lookup, "PROXMOX_PASSWORD"),
            verify_ssl: parse_or(lookup, "PROXMOX_VERIFY_SSL", "false")?,
            restore_snapshot: parse_or(lookup, "PROXMOX_RESTORE_SNAPSHOT", "true")?,
            shutdown_after: parse_or(lookup, "PROXMOX_SHUTDOWN_AFTER", "true")?,
            ready_timeout_seconds: parse_or(lookup, "PROXMOX_READY_TIMEOUT_SECONDS", "120")?,
            stop_timeout_seconds: parse_or(lookup, "PROXMOX_STOP_TIMEOUT_SECONDS", "120")?,
            poll_interval_seconds: parse_or(lookup, "PROXMOX_POLL_INTERVAL_SECONDS", "2")?,
            grace_period_seconds: parse_or(lookup, "AGENT_GRACE_PERIOD_SECONDS", "30")?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.host.is_empty() {
            anyhow::bail!("PROXMOX_HOST cannot be empty");
        }
        if self.node.is_empty() {
            anyhow::bail!("PROXMOX_NODE cannot be empty");
        }
        if self.vmid == 0 {
            anyhow::bail!("PROXMOX_VMID must be greater than 0");
        }
        if self.poll_interval_seconds == 0 {
            anyhow::bail!("PROXMOX_POLL_INTERVAL_SECONDS must be greater than 0");
        }
        self.credentials()?;
        Ok(())
    }

    /// Token credentials win when both schemes are complete
    pub fn credentials(&self) -> Result<Credentials> {
        Credentials::resolve(
            self.token_id.as_deref(),
            self.token_secret.as_deref(),
            self.username.as_deref(),
            self.password.as_deref(),
        )
        .context("Invalid Proxmox credentials")
    }

    pub fn proxmox_config(&self) -> Result<ProxmoxConfig> {
        let mut config = ProxmoxConfig::new(self.host.clone(), self.node.clone(), self.vmid, self.credentials()?);
        config.verify_ssl = self.verify_ssl;
        config.poll_interval = self.poll_interval();
        Ok(config)
    }

    pub fn lifecycle(&self) -> LifecycleTimings {
        LifecycleTimings {
            ready_timeout: Duration::from_secs(self.ready_timeout_seconds),
            stop_timeout: Duration::from_secs(self.stop_timeout_seconds),
            grace_period: Duration::from_secs(self.grace_period_seconds),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "https://proxmox.local:8006".to_string(),
            node: "pve".to_string(),
            vmid: 100,
            token_id: None,
            token_secret: None,
            username: None,
            password: None,
            verify_ssl: false,
            restore_snapshot: true,
            shutdown_after: true,
            ready_timeout_seconds: 120,
            stop_timeout_seconds: 120,
            poll_interval_seconds: 2,
            grace_period_seconds: 30,
        }
    }
}

/// Deadlines and pauses around a detonation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    pub ready_timeout: Duration,
    pub stop_timeout: Duration,
    pub grace_period: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(120),
            grace_period: Duration::from_secs(30),
        }
    }
}

/// Whitelist rule source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// JSON rule file; rules are kept in memory when unset
    pub whitelist_file: Option<PathBuf>,
    /// Seed the built-in rules into an empty in-memory store
    pub seed_defaults: bool,
}

impl RulesConfig {
    fn from_lookup(lookup: Lookup) -> Result<Self> {
        Ok(Self {
            whitelist_file: raw(lookup, "WHITELIST_FILE").map(PathBuf::from),
            seed_defaults: parse_or(lookup, "WHITELIST_SEED_DEFAULTS", "true")?,
        })
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            whitelist_file: None,
            seed_defaults: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    fn from_lookup(lookup: Lookup) -> Result<Self> {
        Ok(Self {
            level: string_or(lookup, "LOG_LEVEL", "info"),
            format: string_or(lookup, "LOG_FORMAT", "pretty"),
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.to_log_config()?;
        Ok(())
    }

    pub fn to_log_config(&self) -> Result<LogConfig> {
        let level: LogLevel = self.level.parse().context("Invalid LOG_LEVEL")?;
        let format: LogFormat = self.format.parse().context("Invalid LOG_FORMAT")?;
        Ok(LogConfig {
            level,
            format,
            ..LogConfig::default()
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
