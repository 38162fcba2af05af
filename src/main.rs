use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resources_updater::config::LoggingConfig;
use resources_updater::scheduler::HandlerRun;
use resources_updater::{Config, GroupOutcome, GroupScheduler, HandlerRegistry, RunSummary, SyncContext};

#[derive(Parser)]
#[command(name = "resources-updater")]
#[command(about = "Keeps local resource archives in sync with a remote content index")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Working directory holding the resource directories
        #[arg(short, long, default_value = "./server")]
        working_dir: String,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Synchronize every configured resource group
    Sync {
        /// Compute the change-set without downloading anything
        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show which resources would be updated
    Plan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };

    match cli.command {
        Commands::Init { working_dir, force } => {
            init_logging(cli.verbose, &LoggingConfig::default())?;
            cmd_init(&config_path, working_dir, force)
        }
        Commands::Sync { dry_run, yes } => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(cli.verbose, &config.logging)?;
            info!("Starting resources-updater v{}", env!("CARGO_PKG_VERSION"));
            cmd_sync(&config, &config_path, dry_run, yes).await
        }
        Commands::Plan => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(cli.verbose, &config.logging)?;
            cmd_sync(&config, &config_path, true, true).await
        }
    }
}

/// Initialize logging based on verbosity level and configuration
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(logging.color))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Write a default configuration file
fn cmd_init(config_path: &Path, working_dir: String, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!("⚠️  Configuration already exists: {:?}", config_path);
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let config = Config {
        working_directory: working_dir,
        ..Config::default()
    };
    config.save(config_path)?;

    println!("✅ resources-updater initialized");
    println!("   Config: {:?}", config_path);
    println!("   Working directory: {}", config.working_directory);

    Ok(())
}

/// Run every configured handler once
async fn cmd_sync(config: &Config, config_path: &Path, dry_run: bool, yes: bool) -> Result<()> {
    if !config.enable {
        println!("⏭️  Synchronization is disabled (enable: false)");
        return Ok(());
    }

    let registry = HandlerRegistry::from_config(config)?;
    if registry.is_empty() {
        println!("⏭️  No handlers configured");
        return Ok(());
    }

    if config.ask && !yes && !dry_run && !confirm("Whether to update resources? (y/n) ")? {
        println!("⏭️  Update skipped");
        return Ok(());
    }

    let context = Arc::new(SyncContext::from_config(config, dry_run));
    let scheduler = GroupScheduler::new(config.concurrent);
    let summary = scheduler.run(registry.handlers(), context).await;

    print_summary(&summary, dry_run);

    if config.disable_after_next_time && !dry_run {
        disable_after_run(config_path)?;
        println!("\n📝 Synchronization disabled for next time (disable_after_next_time)");
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;

    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

/// Persist `enable: false` without baking expanded paths into the file
fn disable_after_run(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        return Ok(());
    }

    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
    let mut raw: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

    raw.enable = false;
    raw.save(config_path)
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    if dry_run {
        println!("\n🔍 Dry run - no files were changed");
    } else {
        println!("\n🎉 Synchronization Complete!");
    }

    for run in &summary.runs {
        print_handler_run(run);
    }

    println!("\n📈 Summary:");
    println!("   📊 Handlers: {}", summary.total_handlers);
    println!("   ✅ Successful handlers: {}", summary.successful_handlers);
    println!("   ❌ Failed handlers: {}", summary.failed_handlers);
    println!("   ⚠️  Failed groups: {}", summary.failed_groups);
    println!("   📥 Updated files: {}", summary.updated_files);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());
}

fn print_handler_run(run: &HandlerRun) {
    println!("\n📦 {}", run.identifier);

    let report = match &run.result {
        Ok(report) => report,
        Err(error) => {
            println!("   ❌ {}", error);
            return;
        }
    };

    for group in &report.groups {
        match &group.outcome {
            GroupOutcome::UpToDate => println!("   ✅ {}: up to date", group.directory),
            GroupOutcome::Planned(changes) => {
                println!("   🔄 {}: {} to update", group.directory, changes.len());
                for change in changes {
                    let stale = change
                        .stale_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    println!("      {} -> {} ({})", stale, change.file_name, change.source_url);
                }
            }
            GroupOutcome::Updated(download) => {
                println!(
                    "   📥 {}: {} updated, {} failed",
                    group.directory,
                    download.updated.len(),
                    download.failed
                );
                if download.size_mismatches > 0 {
                    println!("      ⚠️  {} size mismatches", download.size_mismatches);
                }
            }
            GroupOutcome::Failed(error) => println!("   ❌ {}: {}", group.directory, error),
        }
    }
}
