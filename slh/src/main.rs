//! Suite Lifecycle Harness - operator CLI
//!
//! Shows what the harness would do for a given seed: the config overrides
//! it writes, the SSL posture it picks, and which leaked tasks a reap
//! would interrupt in a recorded task snapshot.

#![forbid(unsafe_code)]

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use slh_common::config::{ConfigSource, EnvParser, HarnessSettings, log_directive};
use slh_common::harness::SuiteSeed;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slh")]
#[command(author, version, about = "Suite lifecycle harness inspector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the config overrides applied for a seed
    Overrides {
        /// Suite seed, decimal or 0x hex (random when unset)
        #[arg(long, env = "SLH_SEED")]
        seed: Option<SuiteSeed>,

        /// Nightly run: only the base overrides apply
        #[arg(long, env = "SLH_NIGHTLY")]
        nightly: bool,
    },

    /// Show the SSL posture chosen for a seed
    Ssl {
        #[arg(long, env = "SLH_SEED")]
        seed: Option<SuiteSeed>,

        #[arg(long, env = "SLH_NIGHTLY")]
        nightly: bool,

        /// Chance the suite runs over TLS
        #[arg(long, default_value = "0.5")]
        ssl_probability: f64,

        /// Chance clients authenticate (TLS only)
        #[arg(long, default_value = "0.5")]
        client_auth_probability: f64,
    },

    /// Show which tasks in a recorded snapshot a reap would interrupt
    ReapPlan {
        /// Task snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,

        /// Task-name substring to match
        #[arg(long)]
        filter: String,

        /// Name of the suite's task group
        #[arg(long)]
        group: String,

        /// Extra protected task-name prefix (repeatable; added to the defaults)
        #[arg(long = "protected")]
        protected: Vec<String>,
    },

    /// Print the suite report JSON schema, or export all schemas
    Schema {
        /// Write every schema and the error catalog into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Explain an error code (e.g. SLH-E400)
    Explain {
        code: Option<String>,

        /// List every code
        #[arg(long)]
        all: bool,
    },
}

/// `SLH_LOG_LEVEL` wins when set; otherwise `--verbose` picks the level.
fn cli_log_directive(settings: &HarnessSettings, verbose: bool) -> String {
    match settings.log_level.source {
        ConfigSource::Environment => settings.log_directive(),
        _ => log_directive(if verbose { "debug" } else { "warn" }),
    }
}

fn init_logging(verbose: bool) {
    let mut parser = EnvParser::new();
    let settings = HarnessSettings::from_parser(&mut parser);
    let filter = EnvFilter::try_new(cli_log_directive(&settings, verbose))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
    for err in parser.take_errors() {
        warn!("{err}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut out = std::io::stdout().lock();
    match cli.command {
        Commands::Overrides { seed, nightly } => {
            commands::overrides(&mut out, seed, nightly, cli.json)
        }
        Commands::Ssl {
            seed,
            nightly,
            ssl_probability,
            client_auth_probability,
        } => commands::ssl(
            &mut out,
            seed,
            nightly,
            ssl_probability,
            client_auth_probability,
            cli.json,
        ),
        Commands::ReapPlan {
            snapshot,
            filter,
            group,
            protected,
        } => commands::reap_plan(&mut out, &snapshot, &filter, &group, protected, cli.json),
        Commands::Schema { out: dir } => commands::schema(&mut out, dir.as_deref(), cli.json),
        Commands::Explain { code, all } => commands::explain(&mut out, code.as_deref(), all, cli.json),
    }
}
