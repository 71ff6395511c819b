mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use analysis_orchestrator::build_analyzer;
use analysis_orchestrator::config::Config;
use analysis_orchestrator::sandbox::{select_latest_snapshot, EnvironmentController};
use analysis_orchestrator::utils::load_sample;
use cli::{Cli, Commands, SubmitArgs};
use shared::observability::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;

    init_logging(config.logging.to_log_config()?).context("Failed to initialize logging")?;

    info!("Starting detonate v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Submit(args) => submit(&config, args).await,
        Commands::Health => health(&config).await,
        Commands::Snapshots => snapshots(&config).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn submit(config: &Config, args: SubmitArgs) -> Result<()> {
    let analyzer = build_analyzer(config).await?;

    let mut sample = load_sample(&args.path)
        .await
        .with_context(|| format!("Failed to read sample {}", args.path.display()))?;
    if args.zip || args.password.is_some() {
        sample = sample.archive(args.password);
    }

    let submission = analyzer.submit(sample).await.context("Submission failed")?;
    println!("{}", serde_json::to_string_pretty(&submission)?);
    Ok(())
}

async fn health(config: &Config) -> Result<()> {
    let analyzer = build_analyzer(config).await?;
    let agent = analyzer
        .agent()
        .context("Agent integration is disabled (set AGENT_ENABLED=true)")?;

    agent.health().await.context("Agent is unreachable")?;
    println!("agent at {} is healthy", agent.base_url());
    Ok(())
}

async fn snapshots(config: &Config) -> Result<()> {
    let analyzer = build_analyzer(config).await?;
    let controller = analyzer
        .controller()
        .context("Environment controller is disabled (set PROXMOX_ENABLED=true)")?;

    let snapshots = controller.list_snapshots().await?;
    for snapshot in &snapshots {
        println!(
            "{:<24} {:>12} {}",
            snapshot.name,
            snapshot.snaptime.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
            snapshot.description.trim()
        );
    }

    match select_latest_snapshot(snapshots, &controller.environment_id()) {
        Ok(latest) => println!("\nwould restore: {}", latest.name),
        Err(e) => println!("\n{}", e),
    }
    Ok(())
}
