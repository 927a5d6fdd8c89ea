use std::path::PathBuf;

use clap::Parser;

/// Incrementally harvest posts from the configured campaigns.
///
/// Loads campaign manifests, starts one fetcher per configured invocation
/// and runs until every one-shot job has finished or Ctrl-C is pressed.
#[derive(Parser, Debug)]
#[command(name = "gleaner", version, about)]
pub struct Cli {
    /// Directory of campaign manifest files (overrides MANIFEST_DIR).
    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,

    /// Keep watermarks and records in memory instead of PostgreSQL.
    #[arg(long, env = "GLEANER_MEMORY")]
    pub memory: bool,

    /// Only run fetchers of this campaign id. May be repeated.
    #[arg(long = "only", value_name = "CAMPAIGN_ID")]
    pub only: Vec<String>,

    /// Run every job as one-shot, whatever its configured mode.
    #[arg(long)]
    pub once: bool,

    /// Kill a fetch command that runs longer than this many seconds.
    #[arg(long, env = "GLEANER_COMMAND_TIMEOUT", value_name = "SECS")]
    pub command_timeout: Option<u64>,
}
