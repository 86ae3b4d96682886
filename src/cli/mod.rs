//! Command-line interface for tidekeeper.
//!
//! Downloads, library maintenance and key-ring refresh all run from here.

mod commands;

pub use commands::{Cli, Commands, run_command};
