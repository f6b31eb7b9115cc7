//! Tasksmith CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `.tasksmith/config.toml` (or `--config`)
//!    and validate it before anything else runs.
//! 2. **Wire observability**: configure `tracing-subscriber` with a pretty or
//!    JSON layer and, when an endpoint is configured, an OpenTelemetry OTLP
//!    exporter. All `tracing` spans and structured events emitted by every
//!    crate in the workspace flow through this layer.
//! 3. **Construct infrastructure**: create the Jira tracker, generator chain
//!    and durable record store a command needs, and inject them into the
//!    orchestration layer.
//! 4. **Run one command** and map its outcome to the process exit status.
//!    Ctrl-C cancels a running sync between issues.
//!
//! The CLI runs in single-user mode; no collaboration transport is wired.

mod args;
mod commands;
mod config;
mod telemetry;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::Cli;
use crate::commands::Invocation;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref()).context("invalid configuration")?;
    let _telemetry = telemetry::init(&config.observability, cli.log_format)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling");
                cancel.cancel();
            }
        }
    });

    info!(version = env!("CARGO_PKG_VERSION"), "tasksmith starting");
    let invocation = Invocation {
        config,
        secrets: cli.secrets,
        json: cli.json,
        cancel,
    };
    commands::run(cli.command, &invocation).await
}
