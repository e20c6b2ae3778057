mod cli;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Services(args) => commands::services::run(args).await,
        Command::Read(args) => commands::read::run(args).await,
        Command::Watch(args) => commands::watch::run(args).await,
    }
}
