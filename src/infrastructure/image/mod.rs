//! Picture caching infrastructure.
//!
//! - [`MemoryPictureCache`]: pictures in use plus a bounded LRU of unreferenced ones
//! - [`DiskPictureCache`]: encoded bytes on disk with an expiry lifetime
//! - [`ImageCache`]: request de-duplication across both tiers and the network

mod disk_cache;
mod image_cache;
mod memory_cache;

pub use disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskPictureCache, default_cache_dir};
pub use image_cache::{
    CacheConfig, DEFAULT_DISK_CACHE_LIFETIME, ImageCache, PictureResult, RequestHandle,
    enable_disk_cache, max_images_cached_beyond_lifetime, set_max_images_cached_beyond_lifetime,
};
pub use memory_cache::{CacheStats, MemoryPictureCache, ViewerId};
