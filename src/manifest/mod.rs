//! Project manifest retrieval and serving.
//!
//! The fetcher is the orchestrator's client side; the provider is the HTTP
//! collaborator that serves a file tree to it.

pub mod fetcher;
pub mod provider;
pub mod sample;

pub use fetcher::{ManifestFetcher, ManifestSource};
