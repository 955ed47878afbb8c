//! # logfunnel-cli
//!
//! Command-line front ends for logfunnel.
//!
//! Provides:
//! - `logfunnel serve` — run a collector from a configuration file
//! - `logfunnel info` — print a configuration with defaults applied
//! - `logfunnel-agent` — read a pipe from stdin and relay or route it
//!
//! ```text
//! ┌────────────┐  pipe   ┌──────────────────┐   TCP   ┌─────────────┐
//! │  producer  │────────►│ logfunnel-agent  │────────►│  logfunnel  │
//! └────────────┘ (stdin) └──────────────────┘ frames  └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;

pub use cli::{AgentCli, Cli, Commands};

use std::io;

use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber shared by both binaries.
///
/// `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
