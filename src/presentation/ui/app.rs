//! Viewer application loop.

use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{Event, EventStream};
use futures_util::StreamExt;
use ratatui::{
    DefaultTerminal, Frame,
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    text::Line,
    widgets::{Block, Paragraph, Widget},
};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::domain::entities::{PictureCropping, ViewStatus};
use crate::infrastructure::image::ImageCache;
use crate::presentation::events::ViewerAction;
use crate::presentation::widgets::{ProfilePictureView, ViewOptions};

const TICK_RATE: Duration = Duration::from_millis(50);
const HELP_TEXT: &str = "q quit | c cropping | r reload";

/// Terminal viewer showing one profile picture view per id.
pub struct App {
    cache: Arc<ImageCache>,
    views: Vec<ProfilePictureView>,
    cropping: PictureCropping,
    exiting: bool,
}

impl App {
    /// Creates one view per id, all sharing `cache`.
    #[must_use]
    pub fn new(cache: Arc<ImageCache>, profile_ids: Vec<String>, options: &ViewOptions) -> Self {
        let views = profile_ids
            .into_iter()
            .map(|id| {
                let mut view = ProfilePictureView::with_options(Arc::clone(&cache), options.clone());
                view.set_start_handler(|view| {
                    debug!(profile_id = ?view.profile_id(), "Picture download started");
                });
                view.set_completion_handler(|view, error| match error {
                    Some(error) => {
                        warn!(profile_id = ?view.profile_id(), error = %error, "Picture failed to load");
                    }
                    None => debug!(profile_id = ?view.profile_id(), "Picture loaded"),
                });
                view.set_profile_id(Some(id));
                view
            })
            .collect();

        Self {
            cache,
            views,
            cropping: options.cropping,
            exiting: false,
        }
    }

    /// Views in display order.
    #[must_use]
    pub fn views(&self) -> &[ProfilePictureView] {
        &self.views
    }

    /// Cropping applied to every view.
    #[must_use]
    pub const fn cropping(&self) -> PictureCropping {
        self.cropping
    }

    /// Returns true once quit was requested.
    #[must_use]
    pub const fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// # Errors
    /// Returns error if drawing to the terminal fails.
    pub async fn run(mut self, terminal: &mut DefaultTerminal) -> color_eyre::Result<()> {
        let mut terminal_events = EventStream::new();
        let mut tick = interval(TICK_RATE);

        terminal.draw(|frame| self.draw_frame(frame))?;

        while !self.exiting {
            tokio::select! {
                biased;

                Some(Ok(event)) = terminal_events.next() => {
                    if let Event::Key(key) = event
                        && let Some(action) = ViewerAction::from_key(&key)
                    {
                        self.handle_action(action);
                    }
                    terminal.draw(|frame| self.draw_frame(frame))?;
                }

                _ = tick.tick() => {
                    if self.poll_views() {
                        terminal.draw(|frame| self.draw_frame(frame))?;
                    }
                }
            }
        }

        info!(stats = %self.cache.stats(), "Viewer exiting");
        Ok(())
    }

    /// Applies a key action to the views.
    pub fn handle_action(&mut self, action: ViewerAction) {
        match action {
            ViewerAction::Quit => self.exiting = true,
            ViewerAction::ToggleCropping => {
                self.cropping = self.cropping.toggled();
                info!(cropping = %self.cropping, "Switching cropping");
                for view in &mut self.views {
                    view.set_picture_cropping(self.cropping);
                }
            }
            ViewerAction::Reload => {
                for view in &mut self.views {
                    view.reload();
                }
            }
        }
    }

    /// Applies pending callbacks on every view. Returns true if any changed.
    pub fn poll_views(&mut self) -> bool {
        self.views
            .iter_mut()
            .fold(false, |changed, view| view.poll() | changed)
    }

    fn draw_frame(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }
}

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let [pictures_area, footer_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(area);

        if !self.views.is_empty() {
            let columns = u32::try_from(self.views.len()).unwrap_or(u32::MAX);
            let areas = Layout::horizontal(
                self.views.iter().map(|_| Constraint::Ratio(1, columns)),
            )
            .split(pictures_area);

            for (view, view_area) in self.views.iter().zip(areas.iter()) {
                let block = Block::bordered()
                    .title(view.profile_id().unwrap_or("-").to_string())
                    .title_bottom(status_label(view.status()))
                    .border_style(Style::default().fg(status_color(view.status())));
                let inner = block.inner(*view_area);
                block.render(*view_area, buf);
                view.render(inner, buf);
            }
        }

        Paragraph::new(Line::from(format!(
            "{} | {} | {HELP_TEXT}",
            self.cropping,
            self.cache.stats()
        )))
        .style(Style::default().fg(Color::DarkGray))
        .render(footer_area, buf);
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("views", &self.views.len())
            .field("cropping", &self.cropping)
            .field("exiting", &self.exiting)
            .finish_non_exhaustive()
    }
}

fn status_label(status: &ViewStatus) -> String {
    match status {
        ViewStatus::Empty => "empty".to_string(),
        ViewStatus::Pending => "loading".to_string(),
        ViewStatus::Resolved => "ok".to_string(),
        ViewStatus::Failed(message) => format!("error: {message}"),
    }
}

const fn status_color(status: &ViewStatus) -> Color {
    match status {
        ViewStatus::Empty => Color::DarkGray,
        ViewStatus::Pending => Color::Yellow,
        ViewStatus::Resolved => Color::Green,
        ViewStatus::Failed(_) => Color::Red,
    }
}
