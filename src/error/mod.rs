//! Error handling built on `thiserror` and `anyhow`.
//!
//! Domain-specific error types give precise handling where a caller needs
//! it, while operational helpers attach context and route absorbed failures
//! to the log.

pub mod domain;
pub mod operational;

pub use {
    domain::{LibraryError, SessionError},
    operational::{ErrorReporter, ResultExt},
};
