//! Playback session handling.
//!
//! This module defines the contracts of the external playback engine and
//! artwork color extractor, an in-process simulated engine, the periodic
//! tasks a session runs (position sampling, sleep timer), and the session
//! coordinator that ties them to the library.

pub mod artwork;
pub mod coordinator;
pub mod engine;
pub mod position;
pub mod simulated;
pub mod sleep_timer;

pub use {
    artwork::{AccentColor, ArtworkColorExtractor, NoArtworkColors, PaletteLookup},
    coordinator::{CoordinatorConfig, SessionCoordinator, SessionDependencies},
    engine::{
        PlaybackEngine, PlayerConnection, PlayerConnector, PlayerEvent, RepeatMode,
        TransitionReason,
    },
    simulated::{SimulatedConnector, SimulatedPlayer},
    sleep_timer::{SleepTimer, SleepTimerEvent},
};
