#![deny(missing_docs)]

//! # Kungfu CLI
//!
//! Command line interface for the overlay patcher.
//!
//! Supported Commands:
//! - `build`: Apply overlays to the root configuration's modules and point the
//!   module manifest at the patched copies.

use clap::{Parser, Subcommand};
use kungfu_core::AppResult;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod build;
mod discover;
mod manifest;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "KUNGFU_LOG";

const DEFAULT_LOG_FILTER: &str = "kungfu_core=info,kungfu_cli=info";

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Patch and extend OpenTofu/Terraform modules without forking them"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build patched modules from overlay files.
    Build(build::BuildArgs),
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> AppResult<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build(args) => build::execute(args)?,
    }

    Ok(())
}
