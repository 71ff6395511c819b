use std::path::Path;

use shared::{OrchestratorError, OrchestratorResult};
use tracing::debug;

/// Maximum sample size accepted for detonation (100MB)
pub const MAX_SAMPLE_SIZE: u64 = 100 * 1024 * 1024;

/// Conventional password for malware archives
pub const DEFAULT_ARCHIVE_PASSWORD: &str = "infected";

const FALLBACK_FILE_NAME: &str = "sample.bin";

/// A sample as handed to the orchestrator, before hashing
#[derive(Debug, Clone)]
pub struct SampleSubmission {
    pub data: Vec<u8>,
    pub file_name: String,
    pub is_archive: bool,
    pub archive_password: Option<String>,
}

impl SampleSubmission {
    pub fn new(data: Vec<u8>, file_name: impl AsRef<str>) -> Self {
        Self {
            data,
            file_name: sanitize_file_name(file_name.as_ref()),
            is_archive: false,
            archive_password: None,
        }
    }

    pub fn archive(mut self, password: Option<String>) -> Self {
        self.is_archive = true;
        self.archive_password = password;
        self
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        let size = self.data.len() as u64;
        if size > MAX_SAMPLE_SIZE {
            return Err(OrchestratorError::Validation(format!(
                "sample is {} bytes, limit is {}MB",
                size,
                MAX_SAMPLE_SIZE / 1024 / 1024
            )));
        }
        Ok(())
    }

    /// Treat `.zip` names as archives and fill in the default password when
    /// none was given
    pub fn normalized(mut self) -> Self {
        if !self.is_archive && is_zip_name(&self.file_name) {
            debug!(file_name = %self.file_name, "Treating .zip sample as archive");
            self.is_archive = true;
        }
        if self.is_archive && self.archive_password.as_deref().map_or(true, str::is_empty) {
            self.archive_password = Some(DEFAULT_ARCHIVE_PASSWORD.to_string());
        }
        self
    }
}

pub fn is_zip_name(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().ends_with(".zip")
}

/// Last path component only; falls back to a generic name
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        base.to_string()
    }
}

/// Read a sample from disk, refusing oversized files before reading them
pub async fn load_sample(path: &Path) -> OrchestratorResult<SampleSubmission> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(OrchestratorError::Validation(format!("{} is not a regular file", path.display())));
    }
    if metadata.len() > MAX_SAMPLE_SIZE {
        return Err(OrchestratorError::Validation(format!(
            "{} is {} bytes, limit is {}MB",
            path.display(),
            metadata.len(),
            MAX_SAMPLE_SIZE / 1024 / 1024
        )));
    }

    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!("Loaded sample {} ({} bytes)", path.display(), data.len());
    Ok(SampleSubmission::new(data, file_name))
}
