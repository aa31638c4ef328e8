//! dashboard — operate the trading bot and summarize its trade ledger.
//!
//! `holdings` and `stats` replay a trade ledger (JSON array) into current
//! positions, priced with the external fetch script when available.
//! `bot` opens a line-oriented console over one process supervisor:
//!
//! ```text
//! start <login|run_now_dry|schedule_dry|run_now_real|schedule_real>
//! stop | input <text> | status | logs | quit
//! ```
//!
//! Every response is one JSON line on stdout; diagnostics go to stderr.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use bot_dashboard::config::{AppConfig, CONFIG_PATH, INTERPRETER_ENV};
use bot_dashboard::launch::LaunchSpec;
use bot_dashboard::ledger::{accumulate, holdings, load_trades, portfolio_stats};
use bot_dashboard::prices::PriceTool;
use bot_dashboard::reporter;
use bot_dashboard::types::{BotMode, BotStatus};
use bot_dashboard::{ProcessSupervisor, SHUTDOWN_WAIT_SECS};

#[derive(Parser)]
#[command(name = "dashboard", about = "Trading bot supervisor and ledger dashboard")]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print current holdings derived from a trade ledger
    Holdings {
        /// JSON array of trades, in ledger order
        #[arg(long)]
        trades: PathBuf,

        /// Skip the live price lookup (current price = average price)
        #[arg(long)]
        no_prices: bool,
    },
    /// Print portfolio totals derived from a trade ledger
    Stats {
        /// JSON array of trades, in ledger order
        #[arg(long)]
        trades: PathBuf,

        /// Skip the live price lookup (value = cost basis)
        #[arg(long)]
        no_prices: bool,
    },
    /// Interactive console controlling the bot process
    Bot {
        /// Start the bot in this mode right away
        #[arg(long)]
        mode: Option<BotMode>,
    },
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Cmd::InitConfig { force } => init_config(&cli.config, force),
        Cmd::Holdings { trades, no_prices } => {
            run_holdings(&load_config(&cli.config)?, &trades, no_prices).await
        }
        Cmd::Stats { trades, no_prices } => {
            run_stats(&load_config(&cli.config)?, &trades, no_prices).await
        }
        Cmd::Bot { mode } => run_console(&load_config(&cli.config)?, mode).await,
    }
}

/// Config file (or defaults) with the interpreter env override applied.
fn load_config(path: &Path) -> Result<AppConfig> {
    Ok(AppConfig::load_or_default(path)?
        .with_interpreter_override(std::env::var(INTERPRETER_ENV).ok()))
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default().save(path)?;
    info!("Wrote default config to {}", path.display());
    Ok(())
}

async fn lookup_prices(
    config: &AppConfig,
    symbols: &[String],
    no_prices: bool,
) -> std::collections::HashMap<String, f64> {
    if no_prices || !config.prices.enabled {
        return Default::default();
    }
    PriceTool::from_config(config).fetch_or_empty(symbols).await
}

async fn run_holdings(config: &AppConfig, trades_path: &Path, no_prices: bool) -> Result<()> {
    let trades = load_trades(trades_path)?;
    let ledger = accumulate(&trades);
    let prices = lookup_prices(config, &ledger.active_symbols(), no_prices).await;
    let held = holdings(&ledger, &prices);
    info!("{} trades → {} holding(s)", trades.len(), held.len());
    reporter::report_holdings(&held, ledger.summary);
    Ok(())
}

async fn run_stats(config: &AppConfig, trades_path: &Path, no_prices: bool) -> Result<()> {
    let trades = load_trades(trades_path)?;
    let ledger = accumulate(&trades);
    let prices = lookup_prices(config, &ledger.active_symbols(), no_prices).await;
    let stats = portfolio_stats(&ledger, trades.len(), &prices);
    reporter::report_stats(&stats, ledger.summary);
    Ok(())
}

/// One console line, parsed.
#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Start(BotMode),
    Stop,
    Input(String),
    Status,
    Logs,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim_start()),
        None => (line, ""),
    };
    let cmd = match word {
        "start" => ConsoleCommand::Start(rest.parse()?),
        "stop" => ConsoleCommand::Stop,
        "input" => ConsoleCommand::Input(rest.to_string()),
        "status" => ConsoleCommand::Status,
        "logs" => ConsoleCommand::Logs,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command '{other}'"),
    };
    Ok(Some(cmd))
}

async fn run_console(config: &AppConfig, mode: Option<BotMode>) -> Result<()> {
    let launch = LaunchSpec::from_config(&config.bot);
    info!(
        "Supervising {} in {}",
        launch.interpreter.display(),
        launch.working_dir.display()
    );
    let supervisor = ProcessSupervisor::spawn(launch, config.bot.log_capacity);

    if let Some(mode) = mode {
        supervisor.start(mode).await?;
        reporter::report_status(&supervisor.status().await?);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                reporter::report(&json!({ "error": e.to_string() }));
                continue;
            }
        };

        match cmd {
            ConsoleCommand::Start(mode) => match supervisor.start(mode).await {
                Ok(()) => reporter::report(&json!({
                    "message": format!("Bot started in {mode} mode"),
                    "status": supervisor.status().await?,
                })),
                Err(e) => reporter::report(&json!({ "error": e.to_string() })),
            },
            ConsoleCommand::Stop => {
                supervisor.stop().await?;
                reporter::report(&json!({
                    "message": "Bot stop signal sent",
                    "status": supervisor.status().await?,
                }));
            }
            ConsoleCommand::Input(text) => match supervisor.send_input(&text).await {
                Ok(()) => reporter::report(&json!({ "message": "Input sent successfully" })),
                Err(e) => reporter::report(&json!({ "error": e.to_string() })),
            },
            ConsoleCommand::Status => reporter::report_status(&supervisor.status().await?),
            ConsoleCommand::Logs => reporter::report_logs(&supervisor.logs().await?),
            ConsoleCommand::Quit => break,
        }
    }

    if supervisor.status().await?.status == BotStatus::Running {
        info!("Stopping bot before exit...");
        supervisor.stop().await?;
        let snap = supervisor
            .wait_until_stopped(Duration::from_secs(SHUTDOWN_WAIT_SECS))
            .await?;
        if snap.status == BotStatus::Running {
            warn!("Bot process (pid {:?}) is still running", snap.pid);
        }
    }
    Ok(())
}
