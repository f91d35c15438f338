#![warn(missing_docs)]

//! `pfs-fsck`: runs the ParaFS consistency checks against a gathered database.

use anyhow::Result;
use clap::Parser;
use parafs_fsck::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    tracing::info!("ParaFS fsck starting...");
    cli.run()
}
