mod catalog;
mod engine;
mod evaluator;
mod executor;
mod partition;
mod session_scoring;
#[cfg(test)]
mod engine_tests;

use anyhow::{Context, Result};
use catalog::TestCatalog;
use clap::{Parser, Subcommand};
use engine::{CancelFlag, QuickJsEngine, SandboxEngine};
use gradebox_common::config::SandboxConfig;
use gradebox_common::types::SessionHistory;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gradebox-worker")]
#[command(about = "Gradebox - sandboxed grading of MiniGit submissions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a candidate source file against the test catalog
    Grade {
        /// JavaScript file defining the MiniGit class
        #[arg(short, long)]
        source: PathBuf,

        /// Sandbox configuration file (defaults to config/sandbox.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Compute the composite report for a recorded session
    ScoreSession {
        /// JSON file with events, chatMessages and testRuns
        #[arg(long)]
        history: PathBuf,
    },

    /// Show the visible catalog and per-tier budgets
    Catalog,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON report
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Grade { source, config } => grade(&source, config.as_deref()).await?,
        Commands::ScoreSession { history } => score_session(&history)?,
        Commands::Catalog => print_catalog()?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => {
            let mut config = SandboxConfig::load(path)
                .with_context(|| format!("Failed to load sandbox config {}", path.display()))?;
            config
                .apply_overrides(|key| std::env::var(key).ok())
                .context("Invalid sandbox override in environment")?;
            Ok(config)
        }
        None => SandboxConfig::load_default().context("Failed to load sandbox config"),
    }
}

async fn grade(source_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let source = std::fs::read_to_string(source_path)
        .with_context(|| format!("Failed to read source file {}", source_path.display()))?;
    let catalog = TestCatalog::standard();
    let engine: Arc<dyn SandboxEngine> = Arc::new(QuickJsEngine::new());

    info!(
        source = %source_path.display(),
        timeout_ms = config.timeout_ms,
        memory_limit_mb = config.memory_limit_mb,
        max_parallel = config.max_parallel_tests,
        "Gradebox worker grading submission"
    );

    let cancel = CancelFlag::new();
    let grading = executor::grade_submission(engine, &catalog, &source, &config, &cancel);
    tokio::pin!(grading);

    let outcome = tokio::select! {
        outcome = &mut grading => outcome,
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal, cancelling run...");
            cancel.cancel();
            grading.await
        }
    };

    let response = outcome.context("Grading run did not complete")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn score_session(history_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(history_path)
        .with_context(|| format!("Failed to read session history {}", history_path.display()))?;
    let history: SessionHistory = serde_json::from_str(&content)
        .with_context(|| format!("Malformed session history {}", history_path.display()))?;

    let score = session_scoring::compute_score(&history);
    println!("{}", serde_json::to_string_pretty(&score)?);
    Ok(())
}

fn print_catalog() -> Result<()> {
    let catalog = TestCatalog::standard();

    let visible: Vec<_> = catalog
        .iter()
        .filter(|test| test.visible())
        .map(|test| json!({ "id": test.id, "name": test.name, "tier": test.tier }))
        .collect();
    let tiers: Vec<_> = catalog
        .policies()
        .iter()
        .map(|policy| {
            json!({
                "tier": policy.tier,
                "tests": catalog.tests_for_tier(policy.tier).count(),
                "pointsBudget": policy.points_budget,
                "visible": policy.tier.is_visible(),
            })
        })
        .collect();

    let summary = json!({ "visibleTests": visible, "tiers": tiers });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
