use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use crate::cli::{Cli, Commands};
use crate::cmd::bus::Session;

mod cli;
pub(crate) mod cmd;

fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Scan => Session::new(&cli)?.scan()?,
        Commands::Read { reg, count } => Session::new(&cli)?.read(reg, *count)?,
        Commands::Write { reg, value } => Session::new(&cli)?.write(reg, *value)?,
        Commands::Rmw { reg } => Session::new(&cli)?.rmw(reg)?,
        Commands::Sim { bind, port } => cmd::sim::serve(bind, *port)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            // retries exhausted
            let fatal = e
                .downcast_ref::<etherbone_ops::Error>()
                .is_some_and(etherbone_ops::Error::is_fatal);
            if fatal {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
