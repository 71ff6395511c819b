pub mod dynamic_analyzer;
pub mod whitelist_filter;

// Re-export commonly used types
pub use dynamic_analyzer::{DynamicAnalyzer, DynamicAnalyzerConfig};
pub use whitelist_filter::{extract_host, FilterStats, RuleIndex, WhitelistFilter};
