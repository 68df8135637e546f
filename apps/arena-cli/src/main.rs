//! arena CLI binary entry point.
//!
//! Parses arguments, prunes old log files, sets up tracing and runs the
//! selected subcommand.

mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(dir) = &cli.log_dir {
        logging::prune_old_logs(dir);
    }
    let _guard = logging::init_tracing(cli.log_dir.as_deref(), cli.log_name())?;

    cli.run().await
}
