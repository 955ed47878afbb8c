//! logfunnel remote pipe agent entrypoint.
//!
//! Started at the far end of a tunnel; stdin carries the pipe.

use std::process::ExitCode;

use clap::Parser;

use logfunnel_cli::cli::AgentCli;
use logfunnel_cli::{commands, init_tracing};

fn main() -> ExitCode {
    init_tracing();
    let cli = AgentCli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(commands::agent(&cli.handler_id, &cli.log_info)) {
        Ok(summary) if commands::ended_cleanly(&summary) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
