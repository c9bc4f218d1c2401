//! Operational error context propagation with `anyhow`.
//!
//! The session core absorbs most failures instead of surfacing them: an
//! import that fails is an empty library, a preference write that fails is
//! forgotten. These helpers make sure such failures at least reach the log.

use std::error::Error as StdError;

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::{debug, error, warn},
};

/// Extension trait for enhanced error context.
pub trait ResultExt<T, E> {
    /// Adds context to an error with a static string.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(context)
    }
}

/// Centralized reporting for failures the session core swallows.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Reports a debug-level error.
    pub fn debug(error: &Error, context: &str) {
        debug!(context = context, error = %error, "Ignored error");
    }

    /// Reports a recoverable failure.
    pub fn warn(error: &Error, context: &str) {
        warn!(context = context, error = %error, "Recoverable error");
    }

    /// Reports a failure that leaves part of the session unusable.
    pub fn error(error: &Error, context: &str) {
        error!(context = context, error = %error, "Unrecoverable error");
    }

    /// Logs a failed result at warn level and discards the error.
    ///
    /// # Arguments
    ///
    /// * `result` - Result of a fire-and-forget operation.
    /// * `context` - Short description of the operation.
    ///
    /// # Returns
    ///
    /// The success value, or `None` when the operation failed.
    pub fn absorb<T, E>(result: Result<T, E>, context: &str) -> Option<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                Self::warn(&Error::new(e), context);
                None
            }
        }
    }
}
