//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Check for, download and apply application updates from a feed.
#[derive(Debug, Parser)]
#[command(name = "updraft", version, about)]
pub struct Args {
    /// Feed location (http, https, ftp or file URL)
    #[arg(short = 'f', long)]
    pub feed: String,

    /// Apply updates; without this flag the run only checks
    #[arg(short = 'u', long)]
    pub update: bool,

    /// Write a log file under the temp directory and log every task outcome
    #[arg(long)]
    pub log: bool,

    /// Do not back up replaced files or roll back on failure
    #[arg(long)]
    pub no_rollback: bool,

    /// Transport user name
    #[arg(long)]
    pub username: Option<String>,

    /// Transport password
    #[arg(long, requires = "username")]
    pub password: Option<String>,

    /// Proxy URL; requests fall back to a direct connection if it fails
    #[arg(long)]
    pub proxy: Option<String>,

    /// Directory for downloads, backups and logs
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Installed application directory [default: current directory]
    #[arg(long)]
    pub app_dir: Option<PathBuf>,

    /// Config file [default: <config dir>/updraft/config.ini]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Transient transport failures tolerated per run
    #[arg(long)]
    pub retries: Option<u32>,

    /// Skip the cold pass; tasks that need the application stopped stay pending
    #[arg(long)]
    pub hot_only: bool,

    /// Debug-level console output
    #[arg(short, long)]
    pub verbose: bool,
}
