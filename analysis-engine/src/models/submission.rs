use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::report::AnalysisReport;

/// Lifecycle of a submission. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Running,
    Completed,
    Error,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Error)
    }
}

/// One detonation record, keyed by the SHA-256 of the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Correlation id handed to the agent as `analysis_id`
    pub id: Uuid,
    pub filename: String,
    pub file_hash_sha256: String,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<AnalysisReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Submission {
    pub fn new_running(file_hash_sha256: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            file_hash_sha256: file_hash_sha256.into(),
            status: SubmissionStatus::Running,
            submitted_at: Utc::now(),
            completed_at: None,
            report: None,
            error_message: None,
        }
    }

    pub fn complete(&mut self, report: AnalysisReport) {
        self.status = SubmissionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.report = Some(report);
        self.error_message = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SubmissionStatus::Error;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }
}
