//! Bootstrap orchestration.
//!
//! Mounting, process supervision, and readiness binding, sequenced by the
//! [`session_controller::SessionController`] state machine.

pub mod mounter;
pub mod process;
pub mod readiness;
pub mod session_controller;

pub use session_controller::{SessionController, SessionSettings};
