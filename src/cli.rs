//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use archiver_core::download::parse_byte_rate;
use archiver_core::{Category, FetcherKind};
use clap::{Args, Parser, Subcommand};

/// Archive the media referenced by a personal data export.
///
/// Archiver reads the JSON export, downloads every referenced video into a
/// per-category folder and remembers what it finished, so it can be
/// interrupted and re-run at any time.
#[derive(Parser, Debug)]
#[command(name = "archiver")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/archiver/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the media referenced by an export file
    Download(DownloadArgs),
    /// Show what previous runs archived in an output directory
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// JSON export file
    #[arg(value_name = "EXPORT")]
    pub export: PathBuf,

    /// Directory the category folders are created in (default: .)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (1-100) [default: 10]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Global bandwidth ceiling, e.g. 512K or 10M; 0 disables [default: 10M]
    #[arg(short = 'l', long, value_name = "RATE", value_parser = parse_rate_arg)]
    pub rate_limit: Option<u64>,

    /// Maximum attempts per item, including the first (1-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Initial retry delay in milliseconds; doubles on each attempt [default: 1000]
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..=60_000))]
    pub retry_delay_ms: Option<u64>,

    /// Only download these categories (repeatable)
    #[arg(long = "category", value_name = "CATEGORY")]
    pub categories: Vec<Category>,

    /// How items are fetched: http or external [default: external]
    #[arg(long, value_name = "KIND")]
    pub fetcher: Option<FetcherKind>,

    /// External download tool used by the external fetcher [default: yt-dlp]
    #[arg(long, value_name = "PROGRAM")]
    pub tool: Option<String>,

    /// HTTP connect timeout in seconds (1-3600) [default: 30]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout_secs: Option<u64>,

    /// HTTP idle timeout between body reads in seconds (1-3600) [default: 300]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout_secs: Option<u64>,

    /// Write the run report as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report_json: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Output directory of previous runs (default: .)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of failed items to list
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u16).range(1..))]
    pub limit: u16,
}

fn parse_rate_arg(value: &str) -> Result<u64, String> {
    parse_byte_rate(value).map_err(|err| err.to_string())
}
