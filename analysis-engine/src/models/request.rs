use uuid::Uuid;

/// Everything needed for one detonation run
#[derive(Debug, Clone)]
pub struct DetonationRequest {
    pub sample: Vec<u8>,
    /// Original filename; the extension decides how the guest opens it
    pub file_name: String,
    /// Forwarded to the agent as `analysis_id`
    pub analysis_id: Uuid,
    pub is_archive: bool,
    pub archive_password: Option<String>,
}

impl DetonationRequest {
    pub fn new(sample: Vec<u8>, file_name: impl Into<String>, analysis_id: Uuid) -> Self {
        Self {
            sample,
            file_name: file_name.into(),
            analysis_id,
            is_archive: false,
            archive_password: None,
        }
    }

    pub fn archive(mut self, password: Option<String>) -> Self {
        self.is_archive = true;
        self.archive_password = password;
        self
    }

    /// Password to forward, if any. Empty passwords are not sent.
    pub fn password_to_send(&self) -> Option<&str> {
        self.archive_password.as_deref().filter(|p| !p.is_empty())
    }
}
