use std::sync::Arc;

use shared::crypto::sha256;
use shared::OrchestratorResult;
use tracing::{error, info, warn};

use super::whitelist_filter::WhitelistFilter;
use crate::config::{Config, LifecycleTimings};
use crate::models::{AnalysisReport, DetonationRequest, Submission};
use crate::sandbox::{AgentClient, EnvironmentController, EnvironmentLease, EnvironmentLocks, PowerState};
use crate::storage::{RuleStore, SubmissionStore};
use crate::utils::SampleSubmission;

/// Lease key used when no environment controller is configured
const UNMANAGED_ENVIRONMENT: &str = "unmanaged";

/// Lifecycle switches for the coordinator
#[derive(Debug, Clone, Copy)]
pub struct DynamicAnalyzerConfig {
    /// Roll back to the newest snapshot before each detonation
    pub restore_snapshot: bool,
    /// Power the environment off after each detonation
    pub shutdown_after: bool,
    pub timings: LifecycleTimings,
}

impl DynamicAnalyzerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            restore_snapshot: config.environment.restore_snapshot,
            shutdown_after: config.environment.shutdown_after,
            timings: config.environment.lifecycle(),
        }
    }
}

impl Default for DynamicAnalyzerConfig {
    fn default() -> Self {
        Self {
            restore_snapshot: true,
            shutdown_after: true,
            timings: LifecycleTimings::default(),
        }
    }
}

/// Runs samples through the detonation pipeline:
/// restore environment, dispatch to the agent, power down, whitelist the report.
///
/// Without an agent the analyzer is in offline mode and every detonation
/// yields an empty report without touching the network.
pub struct DynamicAnalyzer {
    config: DynamicAnalyzerConfig,
    agent: Option<AgentClient>,
    controller: Option<Arc<dyn EnvironmentController>>,
    filter: WhitelistFilter,
    submissions: Arc<dyn SubmissionStore>,
    locks: EnvironmentLocks,
}

impl DynamicAnalyzer {
    pub fn new(
        config: DynamicAnalyzerConfig,
        submissions: Arc<dyn SubmissionStore>,
        rules: Arc<dyn RuleStore>,
    ) -> Self {
        Self {
            config,
            agent: None,
            controller: None,
            filter: WhitelistFilter::new(rules),
            submissions,
            locks: EnvironmentLocks::new(),
        }
    }

    pub fn with_agent(mut self, agent: AgentClient) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_controller(mut self, controller: Arc<dyn EnvironmentController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Share leases with other analyzers that target the same environments
    pub fn with_locks(mut self, locks: EnvironmentLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn agent(&self) -> Option<&AgentClient> {
        self.agent.as_ref()
    }

    pub fn controller(&self) -> Option<&Arc<dyn EnvironmentController>> {
        self.controller.as_ref()
    }

    pub fn filter(&self) -> &WhitelistFilter {
        &self.filter
    }

    fn environment_key(&self) -> String {
        self.controller
            .as_ref()
            .map(|c| c.environment_id())
            .unwrap_or_else(|| UNMANAGED_ENVIRONMENT.to_string())
    }

    /// Detonate one sample and return its filtered report.
    ///
    /// Holds the environment lease for the whole run.
    pub async fn analyze(&self, request: &DetonationRequest) -> OrchestratorResult<AnalysisReport> {
        let lease = self.locks.acquire(&self.environment_key()).await;
        self.analyze_with_lease(request, &lease).await
    }

    async fn analyze_with_lease(
        &self,
        request: &DetonationRequest,
        lease: &EnvironmentLease,
    ) -> OrchestratorResult<AnalysisReport> {
        let Some(agent) = self.agent.as_ref() else {
            info!(analysis_id = %request.analysis_id, "Agent integration disabled, returning empty report");
            return Ok(AnalysisReport::empty());
        };

        info!(
            analysis_id = %request.analysis_id,
            environment = %lease.environment_id(),
            "Starting detonation"
        );

        if self.config.restore_snapshot {
            if let Some(controller) = self.controller.as_deref() {
                if let Err(e) = self.prepare_environment(controller, agent).await {
                    warn!(
                        environment = %lease.environment_id(),
                        error_kind = %e.kind(),
                        "Environment preparation failed, dispatching anyway: {}",
                        e
                    );
                }
            }
        }

        let dispatched = agent.analyze(request).await;

        if self.config.shutdown_after {
            if let Some(controller) = self.controller.as_deref() {
                self.teardown_environment(controller).await;
            }
        }

        let raw = dispatched.map_err(|e| {
            error!(analysis_id = %request.analysis_id, error_kind = %e.kind(), "Dispatch failed: {}", e);
            e
        })?;

        let (report, stats) = self.filter.filter_report(&raw).await;
        info!(
            analysis_id = %request.analysis_id,
            removed = stats.removed(),
            remaining = stats.after.total(),
            "Detonation complete"
        );
        Ok(report)
    }

    /// Roll back to the newest snapshot, make sure the guest is running and
    /// the agent answers. Errors are for the caller to log.
    pub async fn prepare_environment(
        &self,
        controller: &dyn EnvironmentController,
        agent: &AgentClient,
    ) -> OrchestratorResult<()> {
        let snapshot = controller.latest_snapshot().await?;
        info!(
            environment = %controller.environment_id(),
            snapshot = %snapshot.name,
            snaptime = snapshot.snaptime.unwrap_or_default(),
            "Restoring snapshot"
        );
        controller.rollback(&snapshot.name).await?;

        // Disk-only snapshots come back powered off.
        if controller.status().await? == PowerState::Stopped {
            info!(environment = %controller.environment_id(), "Guest stopped after rollback, starting it");
            controller.start().await?;
        }

        controller
            .wait_for_status(PowerState::Running, self.config.timings.ready_timeout)
            .await?;

        let grace = self.config.timings.grace_period;
        if !grace.is_zero() {
            info!("Waiting {:?} for the agent to come up", grace);
            tokio::time::sleep(grace).await;
        }

        agent.health().await?;
        info!(environment = %controller.environment_id(), "Environment ready");
        Ok(())
    }

    /// Graceful shutdown with a forced stop as fallback. Never fails; problems
    /// are logged.
    pub async fn teardown_environment(&self, controller: &dyn EnvironmentController) {
        let environment = controller.environment_id();

        if let Err(e) = controller.shutdown().await {
            warn!(environment = %environment, "Graceful shutdown failed, forcing stop: {}", e);
            if let Err(e) = controller.stop().await {
                warn!(environment = %environment, "Forced stop failed: {}", e);
                return;
            }
        }

        match controller
            .wait_for_status(PowerState::Stopped, self.config.timings.stop_timeout)
            .await
        {
            Ok(()) => info!(environment = %environment, "Environment stopped"),
            Err(e) => warn!(environment = %environment, "Environment did not stop: {}", e),
        }
    }

    /// Hash, dedupe, detonate and record a sample.
    ///
    /// A sample whose hash is already known returns the existing record. A
    /// failed detonation is stored on the submission, which is still
    /// returned; only store failures surface as errors.
    pub async fn submit(&self, sample: SampleSubmission) -> OrchestratorResult<Submission> {
        sample.validate()?;
        let sample = sample.normalized();
        let hash = sha256(&sample.data);

        if let Some(existing) = self.submissions.get_submission_by_hash(&hash).await? {
            info!(sha256 = %hash, submission_id = %existing.id, "Sample already submitted");
            return Ok(existing);
        }

        let lease = self.locks.acquire(&self.environment_key()).await;

        // Another submission of the same sample may have finished while we waited.
        if let Some(existing) = self.submissions.get_submission_by_hash(&hash).await? {
            info!(sha256 = %hash, submission_id = %existing.id, "Sample already submitted");
            return Ok(existing);
        }

        let mut submission = Submission::new_running(hash, sample.file_name.clone());
        self.submissions.create_submission(&submission).await?;
        info!(
            submission_id = %submission.id,
            sha256 = %submission.file_hash_sha256,
            file_name = %submission.filename,
            "Submission created"
        );

        let request = DetonationRequest {
            sample: sample.data,
            file_name: sample.file_name,
            analysis_id: submission.id,
            is_archive: sample.is_archive,
            archive_password: sample.archive_password,
        };

        match self.analyze_with_lease(&request, &lease).await {
            Ok(report) => {
                self.submissions
                    .update_submission_report(submission.id, &report)
                    .await?;
                submission.complete(report);
            }
            Err(e) => {
                let message = e.to_string();
                self.submissions
                    .update_submission_error(submission.id, &message)
                    .await?;
                submission.fail(message);
            }
        }

        Ok(self
            .submissions
            .get_submission(submission.id)
            .await?
            .unwrap_or(submission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_rules, SubmissionStatus};
    use crate::sandbox::SnapshotInfo;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use mockito::{Mock, Server, ServerGuard};
    use shared::OrchestratorError;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Power-state machine that records every call
    struct FakeController {
        snapshots: Vec<SnapshotInfo>,
        power: Mutex<PowerState>,
        calls: Mutex<Vec<String>>,
        fail_shutdown: bool,
    }

    impl FakeController {
        fn new(snapshots: &[(&str, Option<i64>)]) -> Self {
            Self {
                snapshots: snapshots
                    .iter()
                    .map(|(name, snaptime)| SnapshotInfo {
                        name: name.to_string(),
                        description: String::new(),
                        snaptime: *snaptime,
                        parent: None,
                    })
                    .collect(),
                power: Mutex::new(PowerState::Running),
                calls: Mutex::new(Vec::new()),
                fail_shutdown: false,
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn set_power(&self, state: PowerState) {
            *self.power.lock().unwrap() = state;
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        /// Calls other than status polls
        fn actions(&self) -> Vec<String> {
            self.calls().into_iter().filter(|c| c != "status").collect()
        }
    }

    #[async_trait]
    impl EnvironmentController for FakeController {
        fn environment_id(&self) -> String {
            "fake/100".to_string()
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(1)
        }

        async fn list_snapshots(&self) -> OrchestratorResult<Vec<SnapshotInfo>> {
            self.record("list_snapshots");
            Ok(self.snapshots.clone())
        }

        async fn rollback(&self, snapshot: &str) -> OrchestratorResult<()> {
            self.record(format!("rollback:{}", snapshot));
            self.set_power(PowerState::Stopped);
            Ok(())
        }

        async fn start(&self) -> OrchestratorResult<()> {
            self.record("start");
            self.set_power(PowerState::Running);
            Ok(())
        }

        async fn shutdown(&self) -> OrchestratorResult<()> {
            self.record("shutdown");
            if self.fail_shutdown {
                return Err(OrchestratorError::Application("guest agent not running".into()));
            }
            self.set_power(PowerState::Stopped);
            Ok(())
        }

        async fn stop(&self) -> OrchestratorResult<()> {
            self.record("stop");
            self.set_power(PowerState::Stopped);
            Ok(())
        }

        async fn status(&self) -> OrchestratorResult<PowerState> {
            self.record("status");
            Ok(self.power.lock().unwrap().clone())
        }
    }

    const AGENT_REPORT: &str = r#"{"success":true,"report":{
        "summary":{"processes_created":2},
        "process_activity":[
            {"timestamp":"t0","process_name":"svchost.exe","pid":"4","command_line":"svchost.exe -k netsvcs"},
            {"timestamp":"t1","process_name":"payload.exe","pid":"77","command_line":"payload.exe"}
        ],
        "network":[
            {"timestamp":"t2","protocol":"tcp","direction":"outbound","process_name":"payload.exe","pid":"77","remote_addr":"10.0.0.5:443"},
            {"timestamp":"t3","protocol":"tcp","direction":"outbound","process_name":"payload.exe","pid":"77","remote_addr":"203.0.113.9:8080"}
        ],
        "unique_hosts":["10.0.0.5","203.0.113.9"]
    }}"#;

    fn fast_config() -> DynamicAnalyzerConfig {
        DynamicAnalyzerConfig {
            restore_snapshot: true,
            shutdown_after: true,
            timings: LifecycleTimings {
                ready_timeout: Duration::from_millis(200),
                stop_timeout: Duration::from_millis(200),
                grace_period: Duration::ZERO,
            },
        }
    }

    fn analyzer(store: Arc<MemoryStore>) -> DynamicAnalyzer {
        DynamicAnalyzer::new(fast_config(), store.clone(), store)
    }

    fn agent_for(server: &ServerGuard) -> AgentClient {
        AgentClient::new(server.url(), Duration::from_secs(5)).unwrap()
    }

    async fn mock_health(server: &mut ServerGuard) -> Mock {
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await
    }

    async fn mock_analyze(server: &mut ServerGuard, status: usize, body: &str) -> Mock {
        server
            .mock("POST", "/analyze")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_offline_mode_returns_empty_report_without_calls() {
        let controller = Arc::new(FakeController::new(&[("clean", Some(1))]));
        let analyzer = analyzer(Arc::new(MemoryStore::new())).with_controller(controller.clone());

        let report = analyzer
            .analyze(&DetonationRequest::new(b"MZ".to_vec(), "a.exe", uuid::Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(report, AnalysisReport::empty());
        assert!(controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_full_lifecycle_restores_dispatches_and_stops() {
        let mut server = Server::new_async().await;
        let health = mock_health(&mut server).await;
        let analyze = mock_analyze(&mut server, 200, AGENT_REPORT).await;

        let controller = Arc::new(FakeController::new(&[("old", Some(10)), ("current", None), ("clean", Some(20))]));
        let store = Arc::new(MemoryStore::with_rules(default_rules()));
        let analyzer = analyzer(store)
            .with_agent(agent_for(&server))
            .with_controller(controller.clone());

        let report = analyzer
            .analyze(&DetonationRequest::new(b"MZ".to_vec(), "payload.exe", uuid::Uuid::new_v4()))
            .await
            .unwrap();

        health.assert_async().await;
        analyze.assert_async().await;
        assert_eq!(
            controller.actions(),
            vec!["list_snapshots", "rollback:clean", "start", "shutdown"]
        );
        assert_eq!(*controller.power.lock().unwrap(), PowerState::Stopped);

        assert_eq!(report.process_activity.len(), 1);
        assert_eq!(report.process_activity[0].process_name, "payload.exe");
        assert_eq!(report.network.len(), 1);
        assert_eq!(report.unique_hosts, vec!["203.0.113.9".to_string()]);
        assert_eq!(report.summary.processes_created, 2);
    }

    #[tokio::test]
    async fn test_missing_snapshots_still_dispatches() {
        let mut server = Server::new_async().await;
        let health = server.mock("GET", "/health").expect(0).create_async().await;
        let analyze = mock_analyze(&mut server, 200, r#"{"success":true,"report":{}}"#).await;

        let controller = Arc::new(FakeController::new(&[("current", None)]));
        let analyzer = analyzer(Arc::new(MemoryStore::new()))
            .with_agent(agent_for(&server))
            .with_controller(controller.clone());

        let report = analyzer
            .analyze(&DetonationRequest::new(b"MZ".to_vec(), "a.exe", uuid::Uuid::new_v4()))
            .await
            .unwrap();

        assert!(report.is_empty());
        analyze.assert_async().await;
        health.assert_async().await;
        assert!(!controller.actions().iter().any(|c| c.starts_with("rollback")));
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_fatal_but_teardown_runs() {
        let mut server = Server::new_async().await;
        let _health = mock_health(&mut server).await;
        let _analyze = mock_analyze(&mut server, 200, r#"{"success":false,"error":"monitor crashed"}"#).await;

        let controller = Arc::new(FakeController::new(&[("clean", Some(1))]));
        let analyzer = analyzer(Arc::new(MemoryStore::new()))
            .with_agent(agent_for(&server))
            .with_controller(controller.clone());

        let err = analyzer
            .analyze(&DetonationRequest::new(b"MZ".to_vec(), "a.exe", uuid::Uuid::new_v4()))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Application(ref m) if m.contains("monitor crashed")));
        assert_eq!(controller.actions().last().map(String::as_str), Some("shutdown"));
    }

    #[tokio::test]
    async fn test_failed_shutdown_falls_back_to_stop() {
        let mut controller = FakeController::new(&[("clean", Some(1))]);
        controller.fail_shutdown = true;
        let analyzer = analyzer(Arc::new(MemoryStore::new()));

        analyzer.teardown_environment(&controller).await;

        assert_eq!(controller.actions(), vec!["shutdown", "stop"]);
        assert_eq!(*controller.power.lock().unwrap(), PowerState::Stopped);
    }

    #[tokio::test]
    async fn test_lifecycle_flags_skip_controller() {
        let mut server = Server::new_async().await;
        let _analyze = mock_analyze(&mut server, 200, r#"{"success":true,"report":{}}"#).await;

        let controller = Arc::new(FakeController::new(&[("clean", Some(1))]));
        let config = DynamicAnalyzerConfig {
            restore_snapshot: false,
            shutdown_after: false,
            ..fast_config()
        };
        let store = Arc::new(MemoryStore::new());
        let analyzer = DynamicAnalyzer::new(config, store.clone(), store)
            .with_agent(agent_for(&server))
            .with_controller(controller.clone());

        analyzer
            .analyze(&DetonationRequest::new(b"MZ".to_vec(), "a.exe", uuid::Uuid::new_v4()))
            .await
            .unwrap();
        assert!(controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resubmission_returns_existing_record() {
        let mut server = Server::new_async().await;
        let analyze = server
            .mock("POST", "/analyze")
            .with_status(200)
            .with_body(r#"{"success":true,"report":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let analyzer = analyzer(store.clone()).with_agent(agent_for(&server));

        let first = analyzer
            .submit(SampleSubmission::new(b"MZ-sample".to_vec(), "a.exe"))
            .await
            .unwrap();
        let second = analyzer
            .submit(SampleSubmission::new(b"MZ-sample".to_vec(), "renamed.exe"))
            .await
            .unwrap();

        assert_eq!(first.status, SubmissionStatus::Completed);
        assert_eq!(second, first);
        assert_eq!(store.submission_count().await, 1);
        analyze.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_detonate_once() {
        let mut server = Server::new_async().await;
        let analyze = server
            .mock("POST", "/analyze")
            .with_status(200)
            .with_body(r#"{"success":true,"report":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let analyzer = analyzer(store.clone()).with_agent(agent_for(&server));

        let (a, b) = tokio::join!(
            analyzer.submit(SampleSubmission::new(b"same bytes".to_vec(), "a.exe")),
            analyzer.submit(SampleSubmission::new(b"same bytes".to_vec(), "b.exe")),
        );

        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(store.submission_count().await, 1);
        analyze.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_detonation_is_recorded() {
        let mut server = Server::new_async().await;
        let _analyze = mock_analyze(&mut server, 502, "bad gateway").await;

        let store = Arc::new(MemoryStore::new());
        let analyzer = analyzer(store.clone()).with_agent(agent_for(&server));

        let submission = analyzer
            .submit(SampleSubmission::new(b"broken".to_vec(), "a.exe"))
            .await
            .unwrap();

        assert_eq!(submission.status, SubmissionStatus::Error);
        assert!(submission.error_message.as_deref().unwrap().contains("502"));

        let stored = store.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Error);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_zip_submission_forwards_default_password() {
        let mut server = Server::new_async().await;
        let analyze = server
            .mock("POST", "/analyze")
            .match_body(mockito::Matcher::Regex(r#"name="password"\r\n\r\ninfected"#.into()))
            .with_status(200)
            .with_body(r#"{"success":true,"report":{}}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let analyzer = analyzer(store).with_agent(agent_for(&server));
        let submission = analyzer
            .submit(SampleSubmission::new(b"PK\x03\x04".to_vec(), "samples.zip"))
            .await
            .unwrap();

        assert_eq!(submission.status, SubmissionStatus::Completed);
        analyze.assert_async().await;
    }

    #[tokio::test]
    async fn test_offline_submit_completes_with_empty_report() {
        let store = Arc::new(MemoryStore::new());
        let analyzer = analyzer(store.clone());

        let submission = analyzer
            .submit(SampleSubmission::new(b"offline".to_vec(), "a.exe"))
            .await
            .unwrap();

        assert_eq!(submission.status, SubmissionStatus::Completed);
        assert_eq!(submission.report, Some(AnalysisReport::empty()));
        assert_eq!(submission.file_hash_sha256, sha256(b"offline"));
    }

    #[tokio::test]
    async fn test_oversized_sample_creates_no_record() {
        let store = Arc::new(MemoryStore::new());
        let analyzer = analyzer(store.clone());

        let huge = vec![0u8; crate::utils::MAX_SAMPLE_SIZE as usize + 1];
        let err = analyzer.submit(SampleSubmission::new(huge, "big.bin")).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert_eq!(store.submission_count().await, 0);
    }
}
