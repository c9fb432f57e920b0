//! Disk tier error types.

/// Result type for disk cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors raised by the disk cache. These never reach a view: callers log
/// them and continue as if the disk tier missed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// I/O error while reading or writing cache files.
    #[error("IO error: {0}")]
    IoError(String),
    /// Cached bytes could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),
}
