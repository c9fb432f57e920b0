//! Profile pictures - a profile picture widget backed by a shared image cache.
//!
//! The cache keeps pictures in memory while any view shows them, retains a
//! bounded number beyond that, optionally persists them on disk with an
//! expiry lifetime and never downloads the same picture twice concurrently.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, configuration and the graph client.
pub mod infrastructure;
/// Presentation layer containing the picture widget and the viewer.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "profile-pictures";
