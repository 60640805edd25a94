use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cxo-db", about = "Inspect and maintain a CXO database", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log file, overriding the configuration
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show object, feed and root statistics
    Stat,
    /// List registered feeds
    Feeds,
    /// List the roots of a feed
    Roots(RootsArgs),
    /// Show the latest root of a feed
    Last(FeedArgs),
    /// Delete the roots of a feed below a sequence number
    Trim(TrimArgs),
    /// Delete a feed and all its roots
    DelFeed(FeedArgs),
    /// Check that the roots of a feed link up
    Verify(FeedArgs),
    /// Rewrite the log without superseded entries
    Compact,
}

#[derive(Args)]
pub struct FeedArgs {
    /// Feed public key (hex)
    pub feed: String,
}

#[derive(Args)]
pub struct RootsArgs {
    /// Feed public key (hex)
    pub feed: String,
    /// Newest first
    #[arg(short, long)]
    pub reverse: bool,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct TrimArgs {
    /// Feed public key (hex)
    pub feed: String,
    /// Keep roots from this sequence number on
    pub seq: u64,
}
