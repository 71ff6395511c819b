use serde::{Deserialize, Serialize};

/// Behavioral report produced by the remote agent for one detonation.
///
/// Collections keep the order the agent reported them in; the whitelist filter
/// only ever removes rows, it never reorders them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub summary: SummaryStats,
    #[serde(default)]
    pub process_activity: Vec<ProcessActivity>,
    #[serde(default)]
    pub file_system: Vec<FileSystemEvent>,
    #[serde(default)]
    pub registry: Vec<RegistryEvent>,
    #[serde(default)]
    pub network: Vec<NetworkEvent>,
    #[serde(default)]
    pub unique_hosts: Vec<String>,
}

impl AnalysisReport {
    /// The canonical report returned when agent integration is disabled:
    /// every counter zero, every collection empty.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> CategoryCounts {
        CategoryCounts {
            processes: self.process_activity.len(),
            files: self.file_system.len(),
            registry: self.registry.len(),
            network: self.network.len(),
            hosts: self.unique_hosts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub analysis_time: f64,
    #[serde(default)]
    pub processes_created: u64,
    #[serde(default)]
    pub files_created: u64,
    #[serde(default)]
    pub registry_modified: u64,
    #[serde(default)]
    pub network_connections: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessActivity {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub command_line: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_pid: Option<String>,
}

/// File operations: CreateFile, DeleteFile, RenameFile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemEvent {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yara_hits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vt_hits: Option<String>,
    /// Destination of a rename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_path: Option<String>,
}

/// Registry operations: RegCreateKey, RegSetValue, RegDeleteValue, RegDeleteKey
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvent {
    #[serde(default)]
    pub timestamp: String,
    /// TCP or UDP
    #[serde(default)]
    pub protocol: String,
    /// Send or Receive
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub pid: String,
    /// `host:port` as reported by the agent
    #[serde(default)]
    pub remote_addr: String,
}

/// Row counts per report category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub processes: usize,
    pub files: usize,
    pub registry: usize,
    pub network: usize,
    pub hosts: usize,
}

impl CategoryCounts {
    pub fn total(&self) -> usize {
        self.processes + self.files + self.registry + self.network + self.hosts
    }
}
