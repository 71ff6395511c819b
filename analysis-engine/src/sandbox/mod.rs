/// Sandbox module for detonation environments
///
/// A detonation runs inside an externally managed virtual machine. This module
/// provides:
/// - The `EnvironmentController` seam and its Proxmox implementation
/// - The HTTP client for the in-guest analysis agent
/// - Bounded status polling
/// - Per-environment exclusive leases

pub mod agent_client;
pub mod auth;
pub mod lease;
pub mod poll;
pub mod proxmox;

pub use agent_client::AgentClient;
pub use auth::{Credentials, SessionTicket};
pub use lease::{EnvironmentLease, EnvironmentLocks};
pub use poll::{BoundedPoll, PollOutcome};
pub use proxmox::{ProxmoxConfig, ProxmoxController};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{OrchestratorError, OrchestratorResult};

/// Name the controller uses for live, non-restorable state
pub const LIVE_SNAPSHOT: &str = "current";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Observed power state of an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Stopped,
    Running,
    /// Anything else the controller reports (paused, prelaunch, ...)
    Transitional(String),
}

impl PowerState {
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "stopped" => PowerState::Stopped,
            "running" => PowerState::Running,
            other => PowerState::Transitional(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PowerState::Stopped => "stopped",
            PowerState::Running => "running",
            PowerState::Transitional(s) => s,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Creation time, unix seconds. Absent on the live pseudo-snapshot.
    #[serde(default)]
    pub snaptime: Option<i64>,
    #[serde(default)]
    pub parent: Option<String>,
}

impl SnapshotInfo {
    pub fn is_live(&self) -> bool {
        self.name == LIVE_SNAPSHOT
    }
}

/// Newest restorable snapshot. Ties keep list order.
pub fn select_latest_snapshot(snapshots: Vec<SnapshotInfo>, environment_id: &str) -> OrchestratorResult<SnapshotInfo> {
    let mut candidates: Vec<SnapshotInfo> = snapshots.into_iter().filter(|s| !s.is_live()).collect();
    candidates.sort_by(|a, b| b.snaptime.unwrap_or(0).cmp(&a.snaptime.unwrap_or(0)));

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| OrchestratorError::NoSnapshots(environment_id.to_string()))
}

/// One externally addressed virtual environment.
///
/// Implementations never cache power state; every call asks the controller.
#[async_trait]
pub trait EnvironmentController: Send + Sync {
    /// Stable identifier used for logging and lease keys
    fn environment_id(&self) -> String;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    async fn list_snapshots(&self) -> OrchestratorResult<Vec<SnapshotInfo>>;

    async fn latest_snapshot(&self) -> OrchestratorResult<SnapshotInfo> {
        let snapshots = self.list_snapshots().await?;
        select_latest_snapshot(snapshots, &self.environment_id())
    }

    async fn rollback(&self, snapshot: &str) -> OrchestratorResult<()>;

    async fn start(&self) -> OrchestratorResult<()>;

    /// Graceful, guest-cooperative power off
    async fn shutdown(&self) -> OrchestratorResult<()>;

    /// Forced power off
    async fn stop(&self) -> OrchestratorResult<()>;

    async fn status(&self) -> OrchestratorResult<PowerState>;

    /// Poll `status` until it equals `target` or `deadline` elapses
    async fn wait_for_status(&self, target: PowerState, deadline: Duration) -> OrchestratorResult<()> {
        let waiting_for = format!("{} to be {}", self.environment_id(), target);
        BoundedPoll::new(self.poll_interval(), deadline)
            .run(|| self.status(), |state| *state == target)
            .await
            .into_result(&waiting_for)
            .map(|_| ())
    }
}
