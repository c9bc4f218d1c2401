//! Cadenza - Music Player Session Core
//!
//! The headless core of a local music player: it imports a track library,
//! derives the views a UI renders (sorted and filtered list, daily mix,
//! listening stats), and keeps an external playback engine's playlist in
//! step with the session's "now playing" state, persisting everything needed
//! to resume after a restart.

pub mod config;
pub mod error;
pub mod library;
pub mod playback;
pub mod state;

// Re-export key types for convenience
pub use {
    config::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore, Preferences},
    error::{LibraryError, SessionError},
    library::{FolderImporter, LibraryProjection, LibraryStats, SortOrder, Track, TrackImporter},
    playback::{
        AccentColor, CoordinatorConfig, PlaybackEngine, PlayerConnector, RepeatMode,
        SessionCoordinator, SessionDependencies,
    },
    state::{ConnectionState, Route, SessionEvent, SessionSnapshot},
};
