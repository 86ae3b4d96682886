//! Tidekeeper - keeps a local music library in step with a streaming catalog.
//!
//! Downloads tracks, albums, favorites and videos, records every committed
//! file in a durable JSON index, and resumes interrupted albums.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod library;
pub mod retry;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("tidekeeper=info".parse()?))
        .init();

    cli::run_command(&args)
}
