//! Domain entity definitions.

mod picture;

pub use picture::{CacheKey, PictureCropping, PictureSource, ProfilePicture, ViewStatus};
