use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "detonate", author, version, about, long_about = None)]
pub struct Cli {
    /// Override LOG_LEVEL (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Detonate a sample and print the submission as JSON
    Submit(SubmitArgs),
    /// Check that the analysis agent answers
    Health,
    /// List environment snapshots and the one that would be restored
    Snapshots,
}

#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Sample to detonate
    pub path: PathBuf,
    /// Treat the sample as a zip archive (implied for .zip files)
    #[arg(long)]
    pub zip: bool,
    /// Archive password; defaults to "infected" for archives
    #[arg(long)]
    pub password: Option<String>,
}
