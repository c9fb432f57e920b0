//! Display surface of a profile picture view.

use std::sync::{Arc, OnceLock};

use image::imageops::FilterType;
use ratatui::{buffer::Buffer, layout::Rect, style::Color, widgets::Widget};

use crate::domain::entities::ProfilePicture;

const UPPER_HALF_BLOCK: &str = "▀";
const EMPTY_IMAGE_SIZE: u32 = 50;

/// What the surface is currently showing.
#[derive(Debug, Clone, Default)]
pub enum SurfaceContent {
    /// Nothing.
    #[default]
    Cleared,
    /// The empty-profile placeholder.
    Placeholder(Arc<image::DynamicImage>),
    /// A resolved profile picture.
    Picture(ProfilePicture),
}

/// Read-only display surface exposed by the view for inspection.
#[derive(Debug, Clone, Default)]
pub struct ImageSurface {
    content: SurfaceContent,
}

impl ImageSurface {
    /// Current content.
    #[must_use]
    pub const fn content(&self) -> &SurfaceContent {
        &self.content
    }

    /// Pixels currently shown, placeholder included.
    #[must_use]
    pub fn image(&self) -> Option<&Arc<image::DynamicImage>> {
        match &self.content {
            SurfaceContent::Cleared => None,
            SurfaceContent::Placeholder(image) => Some(image),
            SurfaceContent::Picture(picture) => Some(&picture.image),
        }
    }

    /// Resolved picture, if one is shown.
    #[must_use]
    pub const fn picture(&self) -> Option<&ProfilePicture> {
        match &self.content {
            SurfaceContent::Picture(picture) => Some(picture),
            _ => None,
        }
    }

    /// Returns true if the placeholder is shown.
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        matches!(self.content, SurfaceContent::Placeholder(_))
    }

    /// Returns true if nothing is shown.
    #[must_use]
    pub const fn is_cleared(&self) -> bool {
        matches!(self.content, SurfaceContent::Cleared)
    }

    pub(crate) fn show_picture(&mut self, picture: ProfilePicture) {
        self.content = SurfaceContent::Picture(picture);
    }

    pub(crate) fn show_placeholder(&mut self, image: Arc<image::DynamicImage>) {
        self.content = SurfaceContent::Placeholder(image);
    }

    pub(crate) fn clear(&mut self) {
        self.content = SurfaceContent::Cleared;
    }
}

/// Draws the image with one half-block per two vertical pixels.
impl Widget for &ImageSurface {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(image) = self.image() else {
            return;
        };
        if area.is_empty() {
            return;
        }

        let pixels = image
            .resize_exact(
                u32::from(area.width),
                u32::from(area.height) * 2,
                FilterType::Triangle,
            )
            .to_rgb8();

        for row in 0..area.height {
            for col in 0..area.width {
                let x = u32::from(col);
                let top = pixels.get_pixel(x, u32::from(row) * 2);
                let bottom = pixels.get_pixel(x, u32::from(row) * 2 + 1);

                if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    cell.set_symbol(UPPER_HALF_BLOCK)
                        .set_fg(Color::Rgb(top[0], top[1], top[2]))
                        .set_bg(Color::Rgb(bottom[0], bottom[1], bottom[2]));
                }
            }
        }
    }
}

/// Default placeholder: a grey silhouette on a light background.
#[must_use]
pub fn default_empty_image() -> Arc<image::DynamicImage> {
    static EMPTY: OnceLock<Arc<image::DynamicImage>> = OnceLock::new();
    Arc::clone(EMPTY.get_or_init(|| {
        let size = EMPTY_IMAGE_SIZE;
        let center = f64::from(size) / 2.0;
        let head_radius = f64::from(size) * 0.2;
        let head_y = f64::from(size) * 0.38;
        let shoulders_y = f64::from(size) * 1.05;
        let shoulders_radius = f64::from(size) * 0.42;

        let image = image::RgbImage::from_fn(size, size, |x, y| {
            let (fx, fy) = (f64::from(x) + 0.5, f64::from(y) + 0.5);
            let in_head = (fx - center).hypot(fy - head_y) <= head_radius;
            let in_shoulders = (fx - center).hypot(fy - shoulders_y) <= shoulders_radius;
            if in_head || in_shoulders {
                image::Rgb([157, 164, 176])
            } else {
                image::Rgb([222, 226, 232])
            }
        });
        Arc::new(image::DynamicImage::ImageRgb8(image))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{CacheKey, PictureCropping, PictureSource};

    #[test]
    fn test_cleared_surface_renders_nothing() {
        let surface = ImageSurface::default();
        let area = Rect::new(0, 0, 4, 2);
        let mut buf = Buffer::empty(area);

        (&surface).render(area, &mut buf);

        assert_eq!(buf[(0, 0)].symbol(), " ");
    }

    #[test]
    fn test_picture_renders_half_blocks() {
        let mut surface = ImageSurface::default();
        let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            8,
            8,
            image::Rgb([0, 0, 0]),
        ));
        surface.show_picture(ProfilePicture::new(
            CacheKey::new("1", PictureCropping::Square).unwrap(),
            Arc::new(image),
            PictureSource::Network,
        ));
        let area = Rect::new(0, 0, 4, 2);
        let mut buf = Buffer::empty(area);

        (&surface).render(area, &mut buf);

        let cell = &buf[(3, 1)];
        assert_eq!(cell.symbol(), UPPER_HALF_BLOCK);
        assert_eq!(cell.fg, Color::Rgb(0, 0, 0));
        assert_eq!(cell.bg, Color::Rgb(0, 0, 0));
    }

    #[test]
    fn test_default_empty_image_is_shared() {
        let a = default_empty_image();
        let b = default_empty_image();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.width(), EMPTY_IMAGE_SIZE);
    }
}
