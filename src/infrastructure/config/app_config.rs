//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::entities::PictureCropping;
use crate::infrastructure::graph::{DEFAULT_TIMEOUT_SECS, GRAPH_API_BASE};
use crate::infrastructure::image::{CacheConfig, DEFAULT_DISK_CACHE_LIFETIME, default_cache_dir};

pub(crate) const APP_NAME: &str = "profile-pictures";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration loaded from `config.toml` and CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cropping used for every view at startup.
    #[serde(default)]
    pub cropping: PictureCropping,

    /// Show the placeholder for views without a profile id.
    #[serde(default = "default_true")]
    pub show_empty_image: bool,

    /// Picture cache configuration.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Graph endpoint configuration.
    #[serde(default)]
    pub graph: GraphSettings,
}

/// Picture cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Pictures kept in memory after no view shows them.
    #[serde(default)]
    pub max_images_cached_beyond_lifetime: usize,

    /// Persist downloaded pictures on disk.
    #[serde(default)]
    pub disk_cache_enabled: bool,

    /// Age in seconds after which disk entries are refetched.
    #[serde(default = "default_disk_cache_lifetime_secs")]
    pub disk_cache_lifetime_secs: u64,

    /// Disk cache directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub disk_cache_dir: Option<PathBuf>,

    /// Disk cache size cap in bytes.
    #[serde(default = "default_disk_cache_max_size")]
    pub disk_cache_max_size: u64,
}

impl CacheSettings {
    /// Converts into the cache's runtime configuration.
    #[must_use]
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_images_cached_beyond_lifetime: self.max_images_cached_beyond_lifetime,
            disk_cache_enabled: self.disk_cache_enabled,
            disk_cache_lifetime: Duration::from_secs(self.disk_cache_lifetime_secs),
            disk_cache_dir: self.disk_cache_dir.clone().unwrap_or_else(default_cache_dir),
            disk_cache_max_size: self.disk_cache_max_size,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_images_cached_beyond_lifetime: 0,
            disk_cache_enabled: false,
            disk_cache_lifetime_secs: default_disk_cache_lifetime_secs(),
            disk_cache_dir: None,
            disk_cache_max_size: default_disk_cache_max_size(),
        }
    }
}

/// Graph endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    /// Base URL of the graph API.
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GraphSettings {
    /// Request timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_disk_cache_lifetime_secs() -> u64 {
    DEFAULT_DISK_CACHE_LIFETIME.as_secs()
}

fn default_disk_cache_max_size() -> u64 {
    crate::infrastructure::image::DEFAULT_MAX_CACHE_SIZE
}

fn default_graph_base_url() -> String {
    GRAPH_API_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cropping) = args.cropping {
            self.cropping = cropping;
        }
        if let Some(max) = args.max_cached {
            self.cache.max_images_cached_beyond_lifetime = max;
        }
        if let Some(enabled) = args.disk_cache {
            self.cache.disk_cache_enabled = enabled;
        }
        if let Some(lifetime) = args.disk_lifetime {
            self.cache.disk_cache_lifetime_secs = lifetime;
        }
        if let Some(base_url) = &args.graph_url {
            self.graph.base_url.clone_from(base_url);
        }
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("profile-pictures.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            cropping: PictureCropping::default(),
            show_empty_image: true,
            cache: CacheSettings::default(),
            graph: GraphSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"
            cropping = "normal"

            [cache]
            max_images_cached_beyond_lifetime = 20
            disk_cache_enabled = true
            disk_cache_dir = "/tmp/pictures"
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cropping, PictureCropping::Normal);
        assert!(config.show_empty_image);
        assert_eq!(config.cache.max_images_cached_beyond_lifetime, 20);
        assert_eq!(
            config.cache.disk_cache_lifetime_secs,
            DEFAULT_DISK_CACHE_LIFETIME.as_secs()
        );
        assert_eq!(config.graph.base_url, GRAPH_API_BASE);

        let cache = config.cache.to_cache_config();
        assert!(cache.disk_cache_enabled);
        assert_eq!(cache.disk_cache_dir, PathBuf::from("/tmp/pictures"));
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.cache.max_images_cached_beyond_lifetime, 0);
        assert!(!config.cache.disk_cache_enabled);
        assert_eq!(config.graph.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_args_override_file_values() {
        let mut config = AppConfig::default();
        let args = CliArgs::parse_from([
            "profile-pictures",
            "--max-cached",
            "5",
            "--disk-cache",
            "true",
            "--disk-lifetime",
            "60",
            "--cropping",
            "normal",
            "123",
            "456",
        ]);

        config.merge_with_args(&args);

        assert_eq!(config.cache.max_images_cached_beyond_lifetime, 5);
        assert!(config.cache.disk_cache_enabled);
        assert_eq!(config.cache.disk_cache_lifetime_secs, 60);
        assert_eq!(config.cropping, PictureCropping::Normal);
        assert_eq!(args.profile_ids, vec!["123", "456"]);
    }
}
