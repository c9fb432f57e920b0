//! Profile picture widget.
//!
//! The view owns an event channel. Cache callbacks only push into it, so
//! handlers and surface updates always run on the task that owns the view,
//! inside [`ProfilePictureView::poll`] or [`ProfilePictureView::settle`].

use std::sync::Arc;

use ratatui::{buffer::Buffer, layout::Rect, widgets::Widget};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, PictureCropping, ViewStatus};
use crate::domain::errors::FetchError;
use crate::infrastructure::image::{ImageCache, PictureResult, RequestHandle};

use super::image_surface::{ImageSurface, default_empty_image};

/// Called when a network fetch starts for the view's current key.
pub type StartHandler = Box<dyn FnMut(&ProfilePictureView)>;

/// Called once per request with the error, if any.
pub type CompletionHandler = Box<dyn FnMut(&ProfilePictureView, Option<&FetchError>)>;

/// Construction options.
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    /// Raises the cache's beyond-lifetime budget to at least this value.
    pub max_images_cached_beyond_lifetime: Option<usize>,
    /// Initial cropping.
    pub cropping: PictureCropping,
    /// Show the placeholder while no profile id is set.
    pub show_empty_image: bool,
    /// Placeholder override.
    pub empty_image: Option<Arc<image::DynamicImage>>,
}

#[derive(Debug)]
enum ViewEvent {
    Started { generation: u64 },
    Completed { generation: u64, result: PictureResult },
}

/// Displays the profile picture for an id, loading it through the shared cache.
pub struct ProfilePictureView {
    cache: Arc<ImageCache>,
    profile_id: Option<String>,
    cropping: PictureCropping,
    request: Option<RequestHandle>,
    generation: u64,
    status: ViewStatus,
    surface: ImageSurface,
    show_empty_image: bool,
    empty_image: Option<Arc<image::DynamicImage>>,
    start_handler: Option<StartHandler>,
    completion_handler: Option<CompletionHandler>,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    events_rx: mpsc::UnboundedReceiver<ViewEvent>,
}

impl ProfilePictureView {
    /// Creates an empty view on `cache`.
    #[must_use]
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self::with_options(cache, ViewOptions::default())
    }

    /// Creates an empty view with explicit options.
    #[must_use]
    pub fn with_options(cache: Arc<ImageCache>, options: ViewOptions) -> Self {
        if let Some(max) = options.max_images_cached_beyond_lifetime {
            cache.raise_max_images_cached_beyond_lifetime(max);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut view = Self {
            cache,
            profile_id: None,
            cropping: options.cropping,
            request: None,
            generation: 0,
            status: ViewStatus::Empty,
            surface: ImageSurface::default(),
            show_empty_image: options.show_empty_image,
            empty_image: options.empty_image,
            start_handler: None,
            completion_handler: None,
            events_tx,
            events_rx,
        };
        view.show_empty_state();
        view
    }

    /// Current profile id.
    #[must_use]
    pub fn profile_id(&self) -> Option<&str> {
        self.profile_id.as_deref()
    }

    /// Sets the profile to display. `None` or an empty id clears the request.
    pub fn set_profile_id(&mut self, profile_id: Option<String>) {
        if self.profile_id == profile_id {
            return;
        }
        self.profile_id = profile_id;
        self.reload();
    }

    /// Current cropping.
    #[must_use]
    pub const fn picture_cropping(&self) -> PictureCropping {
        self.cropping
    }

    /// Changes the cropping and re-requests when it differs.
    pub fn set_picture_cropping(&mut self, cropping: PictureCropping) {
        if self.cropping == cropping {
            return;
        }
        self.cropping = cropping;
        self.reload();
    }

    /// Sets the handler called when a download starts.
    pub fn set_start_handler(&mut self, handler: impl FnMut(&Self) + 'static) {
        self.start_handler = Some(Box::new(handler));
    }

    /// Removes the start handler.
    pub fn clear_start_handler(&mut self) {
        self.start_handler = None;
    }

    /// Sets the handler called once per finished request.
    pub fn set_completion_handler(
        &mut self,
        handler: impl FnMut(&Self, Option<&FetchError>) + 'static,
    ) {
        self.completion_handler = Some(Box::new(handler));
    }

    /// Removes the completion handler.
    pub fn clear_completion_handler(&mut self) {
        self.completion_handler = None;
    }

    /// Whether the placeholder is shown without an id.
    #[must_use]
    pub const fn show_empty_image(&self) -> bool {
        self.show_empty_image
    }

    /// Toggles the placeholder shown while no id is set.
    pub fn set_show_empty_image(&mut self, show: bool) {
        self.show_empty_image = show;
        if self.status == ViewStatus::Empty {
            self.show_empty_state();
        }
    }

    /// Placeholder in effect: the override or the default silhouette.
    #[must_use]
    pub fn empty_image(&self) -> Arc<image::DynamicImage> {
        self.empty_image.clone().unwrap_or_else(default_empty_image)
    }

    /// Overrides the placeholder; `None` restores the default.
    pub fn set_empty_image(&mut self, image: Option<Arc<image::DynamicImage>>) {
        self.empty_image = image;
        if self.surface.is_placeholder() {
            self.surface.show_placeholder(self.empty_image());
        }
    }

    /// Read-only access to the display surface.
    #[must_use]
    pub const fn image_view(&self) -> &ImageSurface {
        &self.surface
    }

    /// Loading state of the current request.
    #[must_use]
    pub const fn status(&self) -> &ViewStatus {
        &self.status
    }

    /// Key currently requested, if any.
    #[must_use]
    pub fn key(&self) -> Option<CacheKey> {
        self.profile_id
            .as_deref()
            .and_then(|id| CacheKey::new(id, self.cropping))
    }

    /// Drops interest in the current key and requests it again.
    pub fn reload(&mut self) {
        self.cancel_request();
        self.generation += 1;

        let Some(key) = self.key() else {
            self.status = ViewStatus::Empty;
            self.show_empty_state();
            return;
        };

        debug!(key = %key, generation = self.generation, "Requesting profile picture");
        self.status = ViewStatus::Pending;

        let generation = self.generation;
        let start_tx = self.events_tx.clone();
        let complete_tx = self.events_tx.clone();
        let handle = self.cache.request_image(
            key,
            move || {
                let _ = start_tx.send(ViewEvent::Started { generation });
            },
            move |result| {
                let _ = complete_tx.send(ViewEvent::Completed { generation, result });
            },
        );
        self.request = Some(handle);

        self.poll();
    }

    /// Applies every delivered callback. Returns true if anything changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events_rx.try_recv() {
            changed |= self.handle_event(event);
        }
        changed
    }

    /// Waits until the current request is resolved or failed.
    pub async fn settle(&mut self) {
        self.poll();
        while self.status.is_pending() {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: ViewEvent) -> bool {
        match event {
            ViewEvent::Started { generation }
                if generation == self.generation && self.status.is_pending() =>
            {
                self.invoke_start_handler();
                true
            }
            ViewEvent::Completed { generation, result } if generation == self.generation => {
                match result {
                    Ok(picture) => {
                        trace!(key = %picture.key, source = %picture.source, "View resolved");
                        self.surface.show_picture(picture);
                        self.status = ViewStatus::Resolved;
                        self.invoke_completion_handler(None);
                    }
                    Err(error) => {
                        debug!(error = %error, "View request failed");
                        self.request = None;
                        self.status = ViewStatus::Failed(error.to_string());
                        self.invoke_completion_handler(Some(&error));
                    }
                }
                true
            }
            _ => {
                trace!("Ignoring event for a previous request");
                false
            }
        }
    }

    fn invoke_start_handler(&mut self) {
        if let Some(mut handler) = self.start_handler.take() {
            handler(&*self);
            if self.start_handler.is_none() {
                self.start_handler = Some(handler);
            }
        }
    }

    fn invoke_completion_handler(&mut self, error: Option<&FetchError>) {
        if let Some(mut handler) = self.completion_handler.take() {
            handler(&*self, error);
            if self.completion_handler.is_none() {
                self.completion_handler = Some(handler);
            }
        }
    }

    fn show_empty_state(&mut self) {
        if self.show_empty_image {
            self.surface.show_placeholder(self.empty_image());
        } else {
            self.surface.clear();
        }
    }

    fn cancel_request(&mut self) {
        if let Some(handle) = self.request.take() {
            self.cache.cancel(&handle);
        }
    }
}

impl Default for ProfilePictureView {
    /// A view bound to the process-wide cache.
    fn default() -> Self {
        Self::new(ImageCache::global())
    }
}

impl Drop for ProfilePictureView {
    fn drop(&mut self) {
        self.cancel_request();
    }
}

impl std::fmt::Debug for ProfilePictureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilePictureView")
            .field("profile_id", &self.profile_id)
            .field("cropping", &self.cropping)
            .field("status", &self.status)
            .field("generation", &self.generation)
            .field("show_empty_image", &self.show_empty_image)
            .field("surface", &self.surface)
            .finish_non_exhaustive()
    }
}

impl Widget for &ProfilePictureView {
    fn render(self, area: Rect, buf: &mut Buffer) {
        self.surface.render(area, buf);
    }
}
