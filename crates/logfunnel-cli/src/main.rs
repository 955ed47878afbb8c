//! logfunnel collector binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;

use logfunnel_cli::cli::{Cli, Commands};
use logfunnel_cli::{commands, init_tracing};

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Serve { config } => commands::serve(config),
        Commands::Info { config } => commands::info(config, &mut io::stdout().lock()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
