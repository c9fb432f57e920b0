mod image_surface;
mod profile_picture_view;

pub use image_surface::{ImageSurface, SurfaceContent, default_empty_image};
pub use profile_picture_view::{CompletionHandler, ProfilePictureView, StartHandler, ViewOptions};
