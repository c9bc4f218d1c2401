//! Contract of the external playback engine.
//!
//! The engine owns the actual audio pipeline. The session coordinator only
//! hands it an ordered list of locators, issues transport commands, and
//! listens to the notifications it emits on its event channel.

use std::{fmt, str::FromStr, sync::Arc};

use {
    async_channel::Receiver,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

use crate::error::domain::SessionError;

/// Repeat behaviour at the end of a track or playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    /// Stop after the last track.
    Off,
    /// Wrap around to the first track (default).
    #[default]
    All,
    /// Loop the current track.
    One,
}

/// Error returned when parsing an unknown repeat mode name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown repeat mode: {0}")]
pub struct ParseRepeatModeError(pub String);

impl RepeatMode {
    /// Next mode in the off → all → one → off cycle.
    #[must_use]
    pub fn cycle(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }

    /// Stable name used for persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::All => "ALL",
            Self::One => "ONE",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepeatMode {
    type Err = ParseRepeatModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFF" => Ok(Self::Off),
            "ALL" => Ok(Self::All),
            "ONE" => Ok(Self::One),
            other => Err(ParseRepeatModeError(other.to_string())),
        }
    }
}

/// Why the engine moved to another playlist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// The previous item finished and playback advanced.
    Auto,
    /// The current item finished and repeat-one restarted it.
    Repeat,
    /// `next` or `previous` was issued.
    Skip,
    /// `seek_to_item` was issued.
    Seek,
    /// A new playlist was loaded.
    PlaylistChanged,
}

impl TransitionReason {
    /// Whether the engine moved on its own or on a skip, as opposed to
    /// following an explicit seek or playlist load by the session.
    #[must_use]
    pub fn is_advance(self) -> bool {
        matches!(self, Self::Auto | Self::Repeat | Self::Skip)
    }
}

/// Notifications emitted asynchronously by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The engine's current item changed.
    TrackTransition {
        /// Index of the new item in the loaded playlist.
        index: usize,
        /// Cause of the transition.
        reason: TransitionReason,
    },
    /// Playback started or stopped.
    IsPlayingChanged(bool),
    /// The current item is buffered and its duration is known.
    Ready {
        /// Duration of the current item in milliseconds.
        duration_ms: u64,
    },
}

/// Transport and playlist control of a connected player.
///
/// Implementations are expected to be cheap to call from the session loop;
/// any heavy lifting happens on the engine's own threads.
pub trait PlaybackEngine: Send + Sync {
    /// Loads a playlist starting at `start_index` / `start_position_ms`.
    fn set_playlist(&self, locators: Vec<String>, start_index: usize, start_position_ms: u64);
    /// Buffers the current item without starting playback.
    fn prepare(&self);
    /// Starts or resumes playback.
    fn play(&self);
    /// Pauses playback.
    fn pause(&self);
    /// Jumps to a playlist item.
    fn seek_to_item(&self, index: usize, position_ms: u64);
    /// Seeks within the current item. Clamping is the engine's job.
    fn seek_to(&self, position_ms: u64);
    /// Skips to the next item.
    fn next(&self);
    /// Skips to the previous item (or restarts the current one).
    fn previous(&self);
    /// Current position in milliseconds.
    fn position_ms(&self) -> u64;
    /// Duration of the current item in milliseconds.
    fn duration_ms(&self) -> u64;
    /// Whether audio is currently playing.
    fn is_playing(&self) -> bool;
    /// Active repeat mode.
    fn repeat_mode(&self) -> RepeatMode;
    /// Sets the repeat mode.
    fn set_repeat_mode(&self, mode: RepeatMode);
    /// Whether shuffle is enabled.
    fn shuffle(&self) -> bool;
    /// Enables or disables shuffle.
    fn set_shuffle(&self, enabled: bool);
    /// Releases the player; no further calls are made afterwards.
    fn release(&self);
}

/// A completed session handshake.
pub struct PlayerConnection {
    /// Handle to the connected engine.
    pub engine: Arc<dyn PlaybackEngine>,
    /// Engine notifications.
    pub events: Receiver<PlayerEvent>,
}

/// Performs the asynchronous player-session handshake.
#[async_trait]
pub trait PlayerConnector: Send + Sync {
    /// Connects to the player.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConnectionFailed` if the handshake fails.
    async fn connect(&self) -> Result<PlayerConnection, SessionError>;
}
