//! Command-line entry point for the OTU table toolkit.
//!
//! Subcommands cover the usual post-OTU-picking chores:
//! 1. Pruning OTUs by sample prevalence and sequence abundance.
//! 2. Grouping samples by mapping-file metadata and assigning colors.
//! 3. Mean relative abundance per sample group.
//! 4. Reading PCoA/UniFrac ordination results.
//! 5. Resolving and truncating taxonomic lineages.

mod bio;
mod category;
mod cli;
mod io;
mod metadata;
mod normalization;
mod otu_table;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};
use log::{error, LevelFilter};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG still takes precedence over the verbosity flag.
    let default_level = if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    if let Err(e) = run_cli(cli) {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
