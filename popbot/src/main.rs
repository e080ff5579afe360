//! Scheduled click-batch bot.
//!
//! Drives a page session through an external driver process, sending a batch
//! of clicks every interval until the configured ceiling, a signal, a closed
//! session or a bot flag stops it. Per-country totals persist in `stats.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use popbot::exit_codes;
use popbot::io::config::{BotConfig, load_config, write_config};
use popbot::io::driver::DriverActuator;
use popbot::io::stats_store::StatsStore;
use popbot::lifecycle::{LifecycleController, spawn_signal_listener, stop_channel};
use popbot::logging;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "popbot.toml";

#[derive(Parser)]
#[command(
    name = "popbot",
    version,
    about = "Scheduled click-batch bot for page-counter services"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the driver and send batches until stopped.
    Run {
        /// Path to the TOML config.
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Write a config file with default settings.
    Init {
        /// Path to the TOML config.
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print persisted per-category totals.
    Stats {
        /// Path to the TOML config.
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FATAL);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init();
    match cli.command {
        Command::Run { config } => cmd_run(&config),
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Stats { config } => cmd_stats(&config),
    }
}

fn cmd_run(config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let stats = stats_store(&cfg, config_path);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(run_bot(cfg, stats))
}

async fn run_bot(cfg: BotConfig, stats: StatsStore) -> Result<i32> {
    let actuator = DriverActuator::spawn(&cfg.driver.command).context("start page driver")?;
    let (stop_tx, stop_rx) = stop_channel();
    spawn_signal_listener(stop_tx);

    let mut controller =
        LifecycleController::new(cfg.run_config(), cfg.target.clone(), stats, actuator, stop_rx);
    let handle = tokio::spawn(async move { controller.run().await });
    match handle.await {
        Ok(summary) => Ok(summary.exit_code()),
        Err(err) => {
            // Only reachable if shutdown itself panicked. The driver child is
            // killed on drop.
            error!(error = %err, "run task aborted, summary skipped");
            Ok(exit_codes::FATAL)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &BotConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    info!(path = %config_path.display(), "wrote default config");
    Ok(exit_codes::OK)
}

fn cmd_stats(config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let store = stats_store(&cfg, config_path);
    let stats = store.load();
    if stats.is_empty() {
        println!("no stats recorded");
        return Ok(exit_codes::OK);
    }
    for (category, entry) in &stats {
        let last = entry
            .last_event_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        println!(
            "{category}\tsent={}\tsucceeded={}\tfailed={}\tlast={last}",
            entry.total_sent, entry.succeeded, entry.failed
        );
    }
    Ok(exit_codes::OK)
}

fn stats_store(cfg: &BotConfig, config_path: &Path) -> StatsStore {
    if cfg.stats_enabled {
        StatsStore::new(cfg.resolved_stats_path(config_path))
    } else {
        StatsStore::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults_config_path() {
        let cli = Cli::parse_from(["popbot", "run"]);
        assert!(
            matches!(cli.command, Command::Run { config } if config == Path::new(DEFAULT_CONFIG))
        );
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["popbot", "init", "--force", "--config", "bot.toml"]);
        assert!(
            matches!(cli.command, Command::Init { config, force: true } if config == Path::new("bot.toml"))
        );
    }

    #[test]
    fn disabled_stats_use_no_file() {
        let cfg = BotConfig {
            stats_enabled: false,
            ..BotConfig::default()
        };
        assert!(stats_store(&cfg, Path::new("popbot.toml")).path().is_none());
    }
}
