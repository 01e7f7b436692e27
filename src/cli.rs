// src/cli.rs
use std::path::PathBuf;

use clap::Parser;

/// Watch syndication feeds and append new articles to the record store.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the feed config (TOML). Defaults to $FEEDWATCH_CONFIG, then config/feeds.toml.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,

    /// Keep records in memory instead of writing to the store
    #[arg(long)]
    pub dry_run: bool,
}
