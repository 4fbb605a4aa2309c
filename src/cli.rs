//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Export help-desk conversations to CSV with attachments.
///
/// Run `discover` once to snapshot every conversation id, then `process`
/// (repeatedly, if interrupted) to fetch and export them.
#[derive(Parser, Debug)]
#[command(name = "helpdesk-export")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Config file (default: $XDG_CONFIG_HOME/helpdesk-export/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for progress files, the CSV, and attachments
    #[arg(short = 'o', long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Minimum delay between API calls in milliseconds (0 to disable spacing)
    #[arg(short = 'l', long, global = true, value_name = "MS", value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub rate_limit: Option<u64>,

    /// Maximum retries for transient failures (0-10)
    #[arg(short = 'r', long, global = true, value_name = "N", value_parser = clap::value_parser!(u32).range(0..=10))]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Walk every listing page and write the pending-ids snapshot
    Discover,

    /// Fetch and export pending conversations not yet done
    Process {
        /// Process at most N conversations this run
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,
    },

    /// Show pending, done, and remaining counts (no network access)
    Status,
}

impl Cli {
    /// Default log level from the verbosity flags.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}
