//! Domain-specific error types using `thiserror`.
//!
//! This module defines the main error enums for the domains of the
//! Cadenza core: library import and playback session handling. Settings
//! errors live next to the preference store in `config::settings`.

use std::io::Error as IoError;

use {lofty::error::LoftyError, thiserror::Error};

/// Library import errors.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// Failed to walk or stat the import folder.
    #[error("IO error: {0}")]
    IoError(#[from] IoError),
    /// Failed to read tags from an audio file.
    #[error("Metadata error: {0}")]
    MetadataError(#[from] LoftyError),
    /// Invalid file path or metadata.
    #[error("Invalid data: {reason}")]
    InvalidData { reason: String },
}

/// Playback session errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The player session handshake did not complete.
    #[error("Player connection failed: {reason}")]
    ConnectionFailed { reason: String },
    /// The coordinator has been disposed and accepts no further commands.
    #[error("Session disposed")]
    Disposed,
}
