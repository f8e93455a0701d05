#![forbid(unsafe_code)]

//! Sandbox bootstrap orchestrator.
//!
//! Boots a sandbox runtime once per process, fetches a project file tree,
//! mounts it, installs dependencies, starts the project's dev server, and
//! binds the preview address announced by the runtime.

pub mod config;
pub mod errors;
pub mod manifest;
pub mod models;
pub mod orchestrator;
pub mod runtime;
pub mod telemetry;

pub use config::BootstrapConfig;
pub use errors::{AppError, Result};
