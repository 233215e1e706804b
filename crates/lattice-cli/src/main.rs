//! Lattice CLI
//!
//! Command-line interface for watching, analyzing and inspecting workspaces.

mod signals;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lattice_core::{Engine, EngineConfig};
use lattice_indexer::Status;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lattice")]
#[command(about = "Lattice - incremental workspace indexing and analysis")]
#[command(version)]
struct Cli {
    /// Config file (default: <data dir>/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the persisted snapshot
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch roots and keep their analysis current until interrupted
    Watch {
        /// Roots to watch, in addition to those in the config
        roots: Vec<PathBuf>,
    },

    /// Analyze every file under a root and print the summary
    Analyze {
        /// Workspace root (default: current directory)
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// Print the persisted analysis of a file or root
    Show {
        /// File or root path
        path: PathBuf,
    },

    /// Reset the persisted snapshot
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::load(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }

    // Initialize logging
    let default_level = config.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli.command, config))
}

async fn run(command: Commands, config: EngineConfig) -> Result<()> {
    match command {
        Commands::Watch { roots } => cmd_watch(config, roots).await,
        Commands::Analyze { root } => cmd_analyze(one_shot(config), &root).await,
        Commands::Show { path } => cmd_show(one_shot(config), &path).await,
        Commands::Clear => cmd_clear(one_shot(config)).await,
    }
}

/// Config for commands that should not watch the configured roots.
///
/// Registering a root would otherwise queue every existing file for
/// analysis, duplicating the explicit workspace run.
fn one_shot(config: EngineConfig) -> EngineConfig {
    EngineConfig {
        roots: Vec::new(),
        initial_scan: false,
        ..config
    }
}

async fn cmd_watch(config: EngineConfig, roots: Vec<PathBuf>) -> Result<()> {
    let engine = Engine::start(config)
        .await
        .context("Failed to start engine")?;

    for root in &roots {
        let root = engine
            .register_root(root)
            .await
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        println!("✓ Watching {}", root.display());
    }

    if engine.roots().is_empty() {
        anyhow::bail!("No roots to watch. Pass a path or list roots in the config.");
    }

    println!("Press Ctrl+C to stop.");

    let mut status = engine.status();
    let reporter = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let Status::Error(message) = &current {
                tracing::warn!("{}", message);
            } else {
                tracing::debug!("{}", current.text());
            }
        }
    });

    signals::wait_for_shutdown().await;

    reporter.abort();
    engine.shutdown().await;
    println!("✓ Stopped.");

    Ok(())
}

async fn cmd_analyze(config: EngineConfig, root: &Path) -> Result<()> {
    let engine = Engine::start(config)
        .await
        .context("Failed to start engine")?;

    let root = engine
        .register_root(root)
        .await
        .with_context(|| format!("Invalid root {}", root.display()))?;

    println!("Analyzing {}...", root.display());
    let result = engine.analyze_workspace(&root).await;
    engine.shutdown().await;
    let result = result.context("Workspace analysis failed")?;

    println!("✓ {} in {}ms", result.summary(), result.duration_ms);
    for failure in &result.failures {
        println!("  ✗ {}: {}", failure.path.display(), failure.error);
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

async fn cmd_show(config: EngineConfig, path: &Path) -> Result<()> {
    let engine = Engine::start(config)
        .await
        .context("Failed to start engine")?;

    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let store = engine.store();

    if let Some(result) = store.get_workspace_analysis(&path) {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if let Some(result) = store.get_file_analysis(&path) {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("No analysis stored for {}", path.display());
    }

    engine.shutdown().await;
    Ok(())
}

async fn cmd_clear(config: EngineConfig) -> Result<()> {
    let engine = Engine::start(config)
        .await
        .context("Failed to start engine")?;

    engine
        .store()
        .clear()
        .await
        .context("Failed to clear state")?;
    engine.shutdown().await;

    println!("✓ Cleared persisted analysis state.");
    Ok(())
}
