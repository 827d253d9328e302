use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repomirror::health::CheckResult;
use repomirror::{diagnostics, Config, HealthCheck, Scheduler};

#[derive(Parser)]
#[command(name = "repomirror")]
#[command(about = "Unattended mirror agent for GitHub repositories, stars and gists")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the catalog every interval, forever (default)
    Run,

    /// Walk the catalog once and print the summary
    Once,

    /// System health check and diagnostics
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging depends on the configured level, so config errors go to stderr
    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    init_logging(cli.verbose, &config.logging.level);
    info!("Starting repomirror v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli.command.unwrap_or(Commands::Run), config).await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Run => cmd_run(config).await,
        Commands::Once => cmd_once(&config).await,
        Commands::Doctor => cmd_doctor(&config),
    }
}

/// Initialize logging: RUST_LOG, then --verbose, then the configured level
fn init_logging(verbose: bool, level: &str) {
    let fallback = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_with_env(&path),
        None => Config::load_or_default(),
    }
}

async fn cmd_run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    if let Some(addr) = config.diagnostics.listen_addr.clone() {
        diagnostics::spawn(addr, Arc::clone(&config));
    }

    let scheduler = Scheduler::from_config(&config).await?;
    match scheduler.run_forever().await? {}
}

async fn cmd_once(config: &Config) -> Result<()> {
    let scheduler = Scheduler::from_config(config).await?;
    let summary = scheduler.run_cycle().await?;

    println!("Mirrored artifacts: {}", summary.total());
    println!("  owned repositories:   {}", summary.owned);
    println!("  starred repositories: {}", summary.starred);
    println!("  gists:                {}", summary.gists);
    println!(
        "  created {}, updated {}, skipped {}",
        summary.created, summary.updated, summary.skipped_missing
    );
    Ok(())
}

fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config);
    print_health_report(&health);

    if !health.all_passed() {
        anyhow::bail!("{} health check(s) failed", health.errors().len());
    }
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 repomirror System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
