use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::{OrchestratorError, OrchestratorResult};
use tracing::{debug, info, warn};

use crate::models::{AnalysisReport, DetonationRequest};

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Added on top of the analysis timeout to cover upload and report transfer
pub const DISPATCH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct AgentResponse {
    success: bool,
    #[serde(default)]
    report: Option<AnalysisReport>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the analysis agent running inside the guest
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    analysis_timeout: Duration,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>, analysis_timeout: Duration) -> OrchestratorResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(OrchestratorError::Configuration("agent URL is empty".to_string()));
        }

        // No client-wide timeout; each call sets its own.
        let client = Client::builder()
            .user_agent("Detonation-Orchestrator/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url,
            analysis_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upper bound for one `/analyze` round trip
    pub fn dispatch_timeout(&self) -> Duration {
        self.analysis_timeout + DISPATCH_MARGIN
    }

    /// Probe `GET /health`. Any non-200 answer counts as unreachable.
    pub async fn health(&self) -> OrchestratorResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(format!("agent unreachable: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(OrchestratorError::Transport(format!(
                "agent unreachable: health check returned HTTP {}",
                response.status().as_u16()
            )));
        }

        debug!("Agent at {} is healthy", self.base_url);
        Ok(())
    }

    /// Upload the sample and wait for the raw behavioural report. Not retried.
    pub async fn analyze(&self, request: &DetonationRequest) -> OrchestratorResult<AnalysisReport> {
        let file_part = Part::bytes(request.sample.clone()).file_name(request.file_name.clone());

        let mut form = Form::new()
            .part("file", file_part)
            .text("analysis_id", request.analysis_id.to_string());

        if request.is_archive {
            form = form.text("is_zip", "true");
            if let Some(password) = request.password_to_send() {
                form = form.text("password", password.to_string());
            }
        }

        info!(
            analysis_id = %request.analysis_id,
            file_name = %request.file_name,
            size = request.sample.len(),
            is_archive = request.is_archive,
            "Dispatching sample to agent"
        );

        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .multipart(form)
            .timeout(self.dispatch_timeout())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Application(format!(
                "agent returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body: AgentResponse = response.json().await?;
        if !body.success {
            let message = body.error.unwrap_or_else(|| "unknown agent error".to_string());
            warn!(analysis_id = %request.analysis_id, "Agent reported failure: {}", message);
            return Err(OrchestratorError::Application(format!("agent analysis failed: {}", message)));
        }

        body.report.ok_or_else(|| {
            OrchestratorError::Application("agent reported success without a report".to_string())
        })
    }
}
