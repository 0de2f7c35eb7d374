//! Siphon command line.
//!
//! Runs a connector described by `siphon.toml` and inspects its state.
//!
//! # Quick Start
//!
//! ```bash
//! # Relay events.jsonl into operations.jsonl using ./siphon.toml
//! siphon run
//!
//! # Show where each stream has got to
//! siphon checkpoints list
//!
//! # Print the merged configuration
//! siphon config show --format toml
//! ```

mod commands;
mod file_sink;
mod file_source;
mod style;
mod wiring;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Siphon - relay events from an ordered log into a target system.
#[derive(Parser)]
#[command(name = "siphon")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Run the connector until the source is exhausted or a signal arrives.
    Run {
        /// Project directory containing siphon.toml.
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Ignore ~/.config/siphon/config.toml.
        #[arg(long)]
        no_user_config: bool,
    },

    /// Checkpoint inspection and repair.
    #[command(subcommand)]
    Checkpoints(CheckpointCommands),

    /// Configuration management.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List every stored checkpoint.
    List {
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Overwrite the checkpoint of one partition key.
    Set {
        /// Partition key (stream name).
        key: String,

        /// Last position to treat as processed.
        position: u64,

        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the merged configuration.
    Show {
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Output format (text, json, toml).
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate the merged configuration.
    Validate {
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

/// Installs the fmt subscriber on stderr. `RUST_LOG` wins over `default_directive`.
pub(crate) fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    style::set_no_color(cli.no_color);

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Run {
            project,
            no_user_config,
        } => commands::run::run(&project, !no_user_config),
        Commands::Checkpoints(cmd) => {
            init_tracing("warn");
            match cmd {
                CheckpointCommands::List { project } => commands::checkpoints::list(&project),
                CheckpointCommands::Set {
                    key,
                    position,
                    project,
                } => commands::checkpoints::set(&project, &key, position),
            }
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show { project, format } => commands::config::show(&project, &format),
            ConfigCommands::Validate { project } => commands::config::validate(&project),
        },
    }
}
