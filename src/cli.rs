//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use transfer_core::DEFAULT_MAX_RETRIES;

/// Fetch, download or upload URLs through a transfer session.
///
/// Without `--output` or `--upload`, each URL is fetched into memory and its
/// status and size are reported.
#[derive(Parser, Debug)]
#[command(name = "transfer")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to transfer
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Session configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Download each URL into this directory
    #[arg(short, long, value_name = "DIR", conflicts_with = "upload")]
    pub output: Option<PathBuf>,

    /// Upload this file to each URL with PUT
    #[arg(long, value_name = "FILE")]
    pub upload: Option<PathBuf>,

    /// Basic auth credential offered on 401 challenges, as USER:PASSWORD
    #[arg(short = 'u', long, value_name = "USER:PASSWORD")]
    pub user: Option<String>,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Minimum delay between requests to same domain in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: u64,

    /// Create requests suspended and resume them explicitly
    #[arg(long)]
    pub no_auto_start: bool,
}
