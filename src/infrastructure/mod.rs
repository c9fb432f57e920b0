//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Graph API picture fetcher.
pub mod graph;
/// Picture caches.
pub mod image;

pub use config::{AppConfig, CliArgs, LogLevel, StorageManager};
pub use graph::GraphPictureFetcher;
pub use image::{CacheConfig, CacheStats, ImageCache};
