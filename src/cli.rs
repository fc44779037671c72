//! Command-line interface for domintel
//!
//! Global options override the corresponding keys of the settings file, so
//! every flag is optional and only applied when given. Three subcommands:
//!
//! - `analyze`: full analysis of one domain, cache permitting
//! - `cached`: the stored record for one domain, without any resolution
//! - `batch`: stream a file of domains through `analyze`, emitting JSON lines

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Settings;

/// Domain intelligence aggregation with a staleness-checked cache
///
/// # Examples
///
/// ```
/// use clap::Parser;
/// use domintel::cli::{Cli, Commands};
///
/// let cli = Cli::parse_from(["domintel", "--timeout-ms", "3000", "analyze", "--domain", "example.cl"]);
/// assert_eq!(cli.timeout_ms, Some(3000));
/// assert!(matches!(cli.command, Commands::Analyze { .. }));
/// ```
#[derive(Parser)]
#[command(
    name = "domintel",
    about = "Aggregates DNS, registration, hosting, software and security data for domains",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON settings file; keys not present keep their defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory of the JSON record store
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Content fetch timeout in milliseconds
    #[arg(short = 't', long)]
    pub timeout_ms: Option<u64>,

    /// Domains analysed concurrently in batch mode
    #[arg(short = 'c', long)]
    pub concurrent_requests: Option<usize>,
}

impl Cli {
    /// Applies the flags that were given on top of `settings`
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.store_dir {
            settings.store_dir = dir.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.fetch_timeout_ms = timeout_ms;
        }
        if let Some(concurrent) = self.concurrent_requests {
            settings.concurrent_requests = concurrent;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyse a single domain and print the merged record
    Analyze {
        /// Domain or URL to analyse (e.g. example.cl)
        #[arg(short, long)]
        domain: String,
    },
    /// Print the cached record for a domain; exits non-zero when there is none
    Cached {
        #[arg(short, long)]
        domain: String,
    },
    /// Analyse domains from a file, one per line
    ///
    /// Empty lines and lines starting with '#' are skipped. Results are
    /// written as JSON lines to the output file, or pretty-printed to stdout.
    Batch {
        /// Input file containing domains (one per line)
        #[arg(short, long)]
        input_file: PathBuf,

        /// Output file for results (one JSON record per line)
        #[arg(short, long)]
        output_file: Option<PathBuf>,

        /// Domains per chunk; results are flushed after each chunk
        #[arg(long, default_value = "100")]
        chunk_size: usize,

        /// Domains analysed per minute
        #[arg(short, long, default_value = "20")]
        rate_limit: u64,
    },
}
