//! Key handling for the viewer.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What a key press asks the viewer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerAction {
    /// Exit the viewer.
    Quit,
    /// Switch every view between square and normal cropping.
    ToggleCropping,
    /// Re-request every picture.
    Reload,
}

impl ViewerAction {
    /// Maps a key press to an action. Releases and unbound keys map to `None`.
    #[must_use]
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.kind == KeyEventKind::Release {
            return None;
        }

        match (key.code, key.modifiers) {
            (KeyCode::Char('q') | KeyCode::Esc, KeyModifiers::NONE)
            | (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Self::Quit),
            (KeyCode::Char('c'), KeyModifiers::NONE) => Some(Self::ToggleCropping),
            (KeyCode::Char('r'), KeyModifiers::NONE) => Some(Self::Reload),
            _ => None,
        }
    }
}
