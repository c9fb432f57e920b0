use super::app_config::LogLevel;
use crate::domain::entities::PictureCropping;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "profile-pictures",
    version,
    about = "Terminal viewer for social profile pictures",
    long_about = None
)]
pub struct CliArgs {
    /// Profile ids to display.
    #[arg(value_name = "PROFILE_ID")]
    pub profile_ids: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Picture cropping.
    #[arg(long, value_enum)]
    pub cropping: Option<PictureCropping>,

    /// Pictures kept in memory after no view shows them.
    #[arg(long, value_name = "COUNT")]
    pub max_cached: Option<usize>,

    /// Persist pictures on disk.
    #[arg(long)]
    pub disk_cache: Option<bool>,

    /// Disk cache lifetime in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub disk_lifetime: Option<u64>,

    /// Graph API base URL.
    #[arg(long, value_name = "URL", env = "PROFILE_PICTURES_GRAPH_URL")]
    pub graph_url: Option<String>,
}
