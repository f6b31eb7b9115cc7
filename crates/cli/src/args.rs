//! Command-line arguments.
//!
//! Secrets are only ever read from the environment; they have no config-file
//! counterpart.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "tasksmith", version, about = "Turn project descriptions into tracker issues")]
pub struct Cli {
    /// Configuration file. Defaults to `.tasksmith/config.toml` when present.
    #[arg(long, global = true, env = "TASKSMITH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format. Overrides `observability.log_format`.
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Print machine-readable JSON on stdout instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub secrets: Secrets,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Default, Args)]
pub struct Secrets {
    /// Jira API token used with `tracker.email`.
    #[arg(long, env = "TASKSMITH_JIRA_TOKEN", hide_env_values = true, global = true)]
    pub jira_token: Option<String>,

    /// OpenAI API key. Enables the Responses API provider.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_key: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate and validate a backlog, printing it without touching the tracker.
    Generate {
        /// Free-text project description.
        #[arg(long, short)]
        description: String,
    },

    /// Validate a backlog JSON file.
    Validate {
        file: PathBuf,
    },

    /// Synchronize a backlog JSON file with the tracker.
    Sync {
        file: PathBuf,

        /// Show what would be created, updated or skipped.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate a backlog and commit it to the tracker.
    Plan {
        #[arg(long, short)]
        description: String,

        /// Stop after planning and show what would be committed.
        #[arg(long)]
        dry_run: bool,
    },

    /// List the stored sync records.
    Records,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
