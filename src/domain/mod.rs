//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, PictureCropping, ProfilePicture};
pub use errors::FetchError;
pub use ports::PictureFetcherPort;
