//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// logfunnel collector.
#[derive(Parser, Debug, Clone)]
#[command(name = "logfunnel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Collector subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a collector until SIGINT or SIGTERM.
    Serve {
        /// Path to a JSON logger configuration.
        #[arg(short, long, env = "LOGFUNNEL_CONFIG")]
        config: PathBuf,
    },

    /// Print a configuration with every default filled in.
    Info {
        /// Path to a JSON logger configuration.
        #[arg(short, long, env = "LOGFUNNEL_CONFIG")]
        config: PathBuf,
    },
}

/// Remote pipe agent.
///
/// Reads newline-delimited records from stdin until a control token, end of
/// input, or a signal.
#[derive(Parser, Debug, Clone)]
#[command(name = "logfunnel-agent")]
#[command(version, about, long_about = None)]
pub struct AgentCli {
    /// Identifier of the handler this agent serves, used in diagnostics.
    #[arg(long)]
    pub handler_id: String,

    /// Logger configuration as JSON.
    #[arg(long)]
    pub log_info: String,
}
