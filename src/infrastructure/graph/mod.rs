//! Social graph collaborator.

mod client;

pub use client::{DEFAULT_TIMEOUT_SECS, GRAPH_API_BASE, GraphPictureFetcher};
