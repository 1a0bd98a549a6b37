//! Hostwatch daemon entry point
//!
//! Runs the polling loop by default; `check` and `digest` run a single pass
//! and exit.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use chrono::{Days, Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use hostwatch::{config::MonitorConfig, scheduler::Monitor};

/// Hostwatch command line interface
#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(about = "Host health monitor with latched threshold alerts")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the polling loop until SIGINT or SIGTERM
    Run,

    /// Run one cycle; notifications are logged instead of sent
    Check {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build and send the daily digest now
    Digest {
        /// Day to summarize (YYYY-MM-DD), yesterday by default
        #[arg(long)]
        date: Option<String>,

        /// Log the digest instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Write the effective configuration to this path
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match MonitorConfig::load_with_fallback(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let _log_guard = match hostwatch::logging::init(&config.logging, cli.log_level.as_deref(), cli.json_logs) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Run) | None => run_monitor(config).await,
        Some(Commands::Check { json }) => check_once(config, json).await,
        Some(Commands::Digest { date, dry_run }) => send_digest(config, date, dry_run).await,
        Some(Commands::Config { show, write }) => handle_config(&config, show, write),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

/// Poll until a shutdown signal arrives
async fn run_monitor(config: MonitorConfig) -> anyhow::Result<()> {
    let mut monitor = Monitor::from_config(config, false).context("Failed to start monitor")?;
    monitor.run().await?;
    info!("Monitor stopped");
    Ok(())
}

/// One cycle with notifications going to the log
async fn check_once(config: MonitorConfig, json: bool) -> anyhow::Result<()> {
    let mut monitor = Monitor::from_config(config, true)?;
    let outcome = monitor
        .run_cycle(Local::now())
        .await
        .context("Check cycle failed")?;

    if json {
        let report = serde_json::json!({
            "severity": outcome.evaluation.severity,
            "active": outcome.evaluation.active_lines,
            "skipped": outcome.evaluation.skipped,
            "broken_processes": outcome.processes.broken,
            "ambiguous_processes": outcome.processes.ambiguous,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Severity: {}", outcome.evaluation.severity.map_or("OK", |s| s.as_str()));
    for line in &outcome.evaluation.active_lines {
        println!("  {}", line);
    }
    for kind in &outcome.evaluation.skipped {
        println!("  {}: no reading", kind);
    }
    if outcome.processes.broken.is_empty() {
        println!("Processes: OK");
    } else {
        println!("Broken processes: {}", outcome.processes.broken.join(", "));
    }
    Ok(())
}

async fn send_digest(config: MonitorConfig, date: Option<String>, dry_run: bool) -> anyhow::Result<()> {
    let date = match date {
        Some(date) => NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("Invalid date: {}", date))?,
        None => Local::now().date_naive() - Days::new(1),
    };

    let mut monitor = Monitor::from_config(config, dry_run)?;
    let (digest, delivered) = monitor.send_digest(date).await?;

    println!("Digest for {}: Status {}", digest.date, digest.status_label());
    if !delivered {
        anyhow::bail!("Digest for {} was not delivered", date);
    }
    Ok(())
}

fn handle_config(config: &MonitorConfig, show: bool, write: Option<PathBuf>) -> anyhow::Result<()> {
    if show {
        println!("Effective configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        // load_with_fallback has already validated
        println!("Configuration is valid");
    }

    if let Some(path) = write {
        config.save_to_file(&path)?;
        println!("Configuration written to {}", path.display());
    }

    Ok(())
}
