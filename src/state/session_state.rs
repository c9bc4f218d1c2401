//! Observable session state for the presentation layer.
//!
//! The coordinator publishes a [`SessionSnapshot`] on request and broadcasts
//! a [`SessionEvent`] whenever one of the observable fields changes, so a UI
//! can either poll or react.

use std::{fmt, path::PathBuf, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

use crate::{
    library::models::{LibraryStats, SortOrder, Track},
    playback::{artwork::AccentColor, engine::RepeatMode},
};

/// Lifecycle of the connection to the platform player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// The session loop has not started yet.
    #[default]
    Uninitialized,
    /// Handshake in flight.
    Connecting,
    /// Player handle available.
    Ready,
    /// Handshake failed; `reconnect` starts a new one.
    Failed {
        /// Failure description.
        reason: String,
    },
    /// The session released the player; terminal.
    Disposed,
}

impl ConnectionState {
    /// Whether playlist and transport commands reach the player.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Top-level screen the user was last on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Route {
    /// Home screen with the daily mix (default).
    #[default]
    Home,
    /// Full library list.
    Library,
    /// Settings screen.
    Settings,
}

/// Error returned when parsing an unknown route name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown route: {0}")]
pub struct ParseRouteError(pub String);

impl Route {
    /// Stable name used for persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Library => "library",
            Self::Settings => "settings",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = ParseRouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home" => Ok(Self::Home),
            "library" => Ok(Self::Library),
            "settings" => Ok(Self::Settings),
            other => Err(ParseRouteError(other.to_string())),
        }
    }
}

/// Point-in-time copy of every observable field.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Player connection lifecycle.
    pub connection: ConnectionState,
    /// Overridden, sorted and filtered library.
    pub visible_tracks: Vec<Track>,
    /// Most-played tracks.
    pub daily_mix: Vec<Track>,
    /// Total plays and top artist.
    pub stats: LibraryStats,
    /// Track in the "now playing" position.
    pub current_track: Option<Track>,
    /// Whether audio is playing.
    pub is_playing: bool,
    /// Last known position in milliseconds.
    pub position_ms: u64,
    /// Duration of the current track in milliseconds.
    pub duration_ms: u64,
    /// Repeat mode.
    pub repeat_mode: RepeatMode,
    /// Shuffle flag.
    pub shuffle: bool,
    /// Accent color derived from the current artwork.
    pub accent_color: AccentColor,
    /// Whether a sleep countdown is running.
    pub sleep_timer_active: bool,
    /// Remaining sleep-timer minutes, rounded up.
    pub sleep_timer_minutes: u32,
    /// Active sort order.
    pub sort_order: SortOrder,
    /// Active search query.
    pub search_query: String,
    /// Weekly activity scaled to `[0, 1]`, Monday first.
    pub weekly_activity: [f32; 7],
    /// UI language tag.
    pub language: String,
    /// Last visited screen.
    pub route: Route,
    /// Folder the importer is restricted to.
    pub music_directory: Option<PathBuf>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::default(),
            visible_tracks: Vec::new(),
            daily_mix: Vec::new(),
            stats: LibraryStats::default(),
            current_track: None,
            is_playing: false,
            position_ms: 0,
            duration_ms: 0,
            repeat_mode: RepeatMode::default(),
            shuffle: false,
            accent_color: AccentColor::DEFAULT,
            sleep_timer_active: false,
            sleep_timer_minutes: 0,
            sort_order: SortOrder::default(),
            search_query: String::new(),
            weekly_activity: [0.0; 7],
            language: "system".to_string(),
            route: Route::default(),
            music_directory: None,
        }
    }
}

/// Session change notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection lifecycle moved.
    ConnectionStateChanged(ConnectionState),
    /// Visible list, daily mix or stats may have changed.
    LibraryChanged,
    /// A different track is now playing (or none).
    CurrentTrackChanged(Option<Track>),
    /// Playback started or stopped.
    PlaybackStateChanged(bool),
    /// Repeat mode changed.
    RepeatModeChanged(RepeatMode),
    /// Shuffle flag changed.
    ShuffleChanged(bool),
    /// Accent color changed.
    AccentColorChanged(AccentColor),
    /// Sleep timer started, ticked or stopped.
    SleepTimerChanged {
        /// Whether a countdown is running.
        active: bool,
        /// Remaining minutes.
        minutes: u32,
    },
    /// Language, route or folder changed.
    PreferencesChanged,
}

#[cfg(test)]
mod tests {
    use crate::state::session_state::{
        ConnectionState, ParseRouteError, Route, SessionSnapshot,
    };

    #[test]
    fn test_route_parse() {
        for route in [Route::Home, Route::Library, Route::Settings] {
            assert_eq!(route.as_str().parse::<Route>(), Ok(route));
        }
        assert_eq!(
            "search".parse::<Route>(),
            Err(ParseRouteError("search".to_string()))
        );
    }

    #[test]
    fn test_snapshot_default() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.connection, ConnectionState::Uninitialized);
        assert!(!snapshot.connection.is_ready());
        assert!(snapshot.visible_tracks.is_empty());
        assert!(snapshot.current_track.is_none());
        assert_eq!(snapshot.language, "system");
        assert_eq!(snapshot.route, Route::Home);
    }
}
