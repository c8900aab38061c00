use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::commands::{self, CommandReport, TriggerReply};
use crate::error::SyncError;
use crate::logging;
use crate::sync::config::{self, LoggingConfig, SyncConfig};
use crate::sync::paths::resolve_paths;

/// Reconcile remote game archives against the local ledger and fan out
/// download commands.
#[derive(Parser)]
#[command(name = "archive-fanout", version, about)]
struct Cli {
    /// Print operator reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a download session for a player's archives.
    Download {
        #[arg(long)]
        username: Option<String>,

        #[arg(long, default_value = "CHESS_DOT_COM")]
        platform: String,

        /// Raw JSON request body, e.g. '{"username":"magnus","platform":"CHESS_DOT_COM"}'.
        #[arg(long, conflicts_with = "username")]
        request: Option<String>,

        /// Correlation id; generated when absent.
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Register a board search over a cached player's downloaded games.
    Search {
        #[arg(long)]
        username: String,

        #[arg(long, default_value = "CHESS_DOT_COM")]
        platform: String,

        #[arg(long)]
        board: String,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Show resolved paths, effective config and table counts.
    Status,

    /// Validate configuration and the environment.
    Verify {
        #[arg(long)]
        strict: bool,
    },

    /// List a user's archive ledger with eligibility.
    Ledger {
        #[arg(long)]
        user_id: String,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}: {}", report.command, if report.ok { "ok" } else { "failed" });
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

fn finish_report(report: CommandReport, json: bool) -> Result<()> {
    print_report(&report, json)?;
    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn finish_trigger(reply: TriggerReply) -> Result<()> {
    println!("{}", serde_json::to_string(&reply.body)?);
    if !reply.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Trigger commands answer configuration failures with the same envelope as
/// pipeline failures.
fn trigger_config(loaded: Result<SyncConfig>) -> Result<std::result::Result<SyncConfig, TriggerReply>> {
    match loaded {
        Ok(cfg) => Ok(Ok(cfg)),
        Err(err) => match err.downcast::<SyncError>() {
            Ok(sync_err) => Ok(Err(TriggerReply::from_result::<()>(Err(sync_err))?)),
            Err(other) => Err(other),
        },
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let loaded = config::load_config();

    let logging_cfg = loaded
        .as_ref()
        .map(|cfg| cfg.logging.clone())
        .unwrap_or_else(|_| LoggingConfig::default());
    logging::init(&logging_cfg);
    for key in config::unknown_env_keys() {
        warn!(%key, "ignoring unknown environment variable");
    }

    let paths = resolve_paths()?;

    match cli.command {
        Command::Download {
            username,
            platform,
            request,
            request_id,
        } => {
            let cfg = match trigger_config(loaded)? {
                Ok(cfg) => cfg,
                Err(reply) => return finish_trigger(reply),
            };
            let opts = commands::download::DownloadOptions {
                username,
                platform,
                request,
                request_id,
            };
            finish_trigger(commands::download::run(&paths, &cfg, &opts)?)
        }
        Command::Search {
            username,
            platform,
            board,
            request_id,
        } => {
            let cfg = match trigger_config(loaded)? {
                Ok(cfg) => cfg,
                Err(reply) => return finish_trigger(reply),
            };
            let opts = commands::search::SearchOptions {
                username,
                platform,
                board,
                request_id,
            };
            finish_trigger(commands::search::run(&paths, &cfg, &opts)?)
        }
        Command::Status => {
            let cfg = loaded?;
            finish_report(commands::status::run(&paths, &cfg)?, cli.json)
        }
        Command::Verify { strict } => {
            let opts = commands::verify::VerifyOptions { strict };
            finish_report(
                commands::verify::run(&paths, loaded.as_ref(), &opts)?,
                cli.json,
            )
        }
        Command::Ledger { user_id } => {
            finish_report(commands::ledger::run(&paths, &user_id)?, cli.json)
        }
    }
}
