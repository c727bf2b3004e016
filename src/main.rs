// src/main.rs
//! channel-digest binary: run the daily pipeline once, as a daemon, or probe
//! every external service.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use channel_digest::{build_pipeline, metrics, scheduler, PipelineConfig, Secrets};

#[derive(Parser, Debug)]
#[command(name = "channel-digest")]
#[command(about = "Chat channel -> ledger -> classifier -> publisher -> archive, once a day")]
#[command(version)]
struct Cli {
    /// Pipeline config (TOML). Falls back to $CHANNEL_DIGEST_CONFIG, then config/pipeline.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging for this crate.
    #[arg(long, global = true)]
    debug: bool,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the run summary as JSON to stdout.
    #[arg(long, global = true)]
    summary_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the pipeline once; exit code 1 when the run is not successful.
    Run,
    /// Run every day at schedule.time until interrupted.
    Daemon,
    /// Probe configuration and connectivity without changing anything.
    Check,
}

fn init_tracing(debug: bool, json: bool) {
    let default = if debug {
        "channel_digest=debug,info"
    } else {
        "channel_digest=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// Cancelled on Ctrl-C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl-C; finishing current phase"),
            _ = terminate => tracing::info!("received terminate signal; finishing current phase"),
        }
        t.cancel();
    });
    token
}

async fn run(cli: Cli) -> Result<bool> {
    let cfg = PipelineConfig::load(cli.config.as_deref())?;
    let secrets = Secrets::from_env();
    tracing::debug!(?secrets, "secrets loaded");

    if cli.command == Command::Check {
        let mut ok = true;
        if let Err(e) = cfg.validate(&secrets) {
            tracing::error!(error = %e, "configuration problems");
            ok = false;
        }
        let pipeline = build_pipeline(&cfg, &secrets)?;
        let checks = pipeline.check(cfg.call_timeout()).await;
        ok &= checks.iter().all(|c| c.ok);
        for c in &checks {
            println!("{:<11} {:<4} {}", c.component, if c.ok { "ok" } else { "FAIL" }, c.detail);
        }
        return Ok(ok);
    }

    cfg.validate(&secrets).context("invalid configuration")?;
    if let Some(addr) = cfg.metrics_socket()? {
        metrics::install_exporter(addr)?;
    }
    let pipeline = Arc::new(build_pipeline(&cfg, &secrets)?);
    tracing::info!(ledger = pipeline.ledger().store().name(), publisher = pipeline.publisher_name(), "pipeline ready");
    pipeline
        .ensure_schema()
        .await
        .context("preparing ledger schema")?;
    let cancel = shutdown_token();

    match cli.command {
        Command::Run => {
            let Some(summary) = pipeline.run_exclusive(&cancel).await else {
                return Ok(false);
            };
            if cli.summary_json {
                println!("{}", summary.to_json());
            } else {
                print!("{}", summary.render_table());
            }
            Ok(summary.success)
        }
        Command::Daemon => {
            let schedule = cfg.daily_schedule()?;
            scheduler::run_daily(pipeline, schedule, cancel).await;
            Ok(true)
        }
        Command::Check => Ok(true),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before anything reads the environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.json_logs);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = ?e, "channel-digest failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
