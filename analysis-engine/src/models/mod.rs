pub mod report;
pub mod request;
pub mod submission;
pub mod whitelist;

// Re-export commonly used types for convenience
pub use report::{
    AnalysisReport,
    CategoryCounts,
    FileSystemEvent,
    NetworkEvent,
    ProcessActivity,
    RegistryEvent,
    SummaryStats,
};
pub use request::DetonationRequest;
pub use submission::{Submission, SubmissionStatus};
pub use whitelist::{default_rules, RuleType, WhitelistRule};
