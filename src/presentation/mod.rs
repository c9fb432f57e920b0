//! Presentation layer: the profile picture widget and the terminal viewer.

/// Key handling.
pub mod events;
/// Viewer application.
pub mod ui;
/// Reusable widgets.
pub mod widgets;

pub use ui::App;
