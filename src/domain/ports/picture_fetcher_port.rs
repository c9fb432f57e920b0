//! Port definition for downloading profile pictures.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::CacheKey;
use crate::domain::errors::FetchError;

/// Downloads the encoded picture bytes for a key.
/// Implementations must be thread-safe; retries are their own business.
#[async_trait]
pub trait PictureFetcherPort: Send + Sync {
    /// Fetches the picture for `key.profile_id()` with `key.cropping()`.
    async fn fetch(&self, key: &CacheKey) -> Result<Bytes, FetchError>;
}
