//! In-process playback engine.
//!
//! `SimulatedPlayer` keeps playlist, transport and timing state without
//! producing audio. Position advances with tokio's clock while playing, so
//! paused-time tests can drive it deterministically. A track only ends when
//! [`SimulatedPlayer::finish_current`] is called.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering::SeqCst},
    },
    time::Duration,
};

use {
    async_channel::{Receiver, Sender, unbounded},
    async_trait::async_trait,
    parking_lot::Mutex,
    tokio::time::{Instant, sleep},
    tracing::debug,
};

use crate::{
    error::domain::SessionError,
    playback::engine::{
        PlaybackEngine, PlayerConnection, PlayerConnector, PlayerEvent, RepeatMode,
        TransitionReason,
    },
};

/// Duration reported for every simulated item.
pub const SIMULATED_TRACK_MS: u64 = 180_000;

/// Restarting instead of going back happens past this position.
const PREVIOUS_RESTART_THRESHOLD_MS: u64 = 3_000;

#[derive(Debug)]
struct PlayerState {
    items: Vec<String>,
    index: Option<usize>,
    base_position_ms: u64,
    playing_since: Option<Instant>,
    prepared: bool,
    repeat_mode: RepeatMode,
    shuffle: bool,
    released: bool,
}

impl PlayerState {
    fn position_ms(&self) -> u64 {
        let elapsed = self
            .playing_since
            .map_or(0, |since| u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX));
        self.base_position_ms
            .saturating_add(elapsed)
            .min(SIMULATED_TRACK_MS)
    }

    fn move_to(&mut self, index: usize, position_ms: u64) {
        self.index = Some(index);
        self.base_position_ms = position_ms.min(SIMULATED_TRACK_MS);
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn following_index(&self) -> Option<usize> {
        let index = self.index?;
        if index + 1 < self.items.len() {
            Some(index + 1)
        } else if self.repeat_mode == RepeatMode::All {
            Some(0)
        } else {
            None
        }
    }
}

/// Playback engine that tracks state without producing audio.
///
/// Shuffle is recorded and reported but does not reorder playback.
#[derive(Debug)]
pub struct SimulatedPlayer {
    /// Playlist and transport state.
    state: Mutex<PlayerState>,
    /// Sender for engine notifications.
    events_tx: Sender<PlayerEvent>,
}

impl SimulatedPlayer {
    /// Creates a player and the receiver of its notifications.
    #[must_use]
    pub fn new() -> (Arc<Self>, Receiver<PlayerEvent>) {
        let (events_tx, events_rx) = unbounded();
        let player = Self {
            state: Mutex::new(PlayerState {
                items: Vec::new(),
                index: None,
                base_position_ms: 0,
                playing_since: None,
                prepared: false,
                repeat_mode: RepeatMode::default(),
                shuffle: false,
                released: false,
            }),
            events_tx,
        };
        (Arc::new(player), events_rx)
    }

    fn emit(&self, event: PlayerEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!("SimulatedPlayer: Dropping event, no listener: {e}");
        }
    }

    /// Sends a notification as if the engine had emitted it on its own.
    #[cfg(test)]
    pub(crate) fn notify(&self, event: PlayerEvent) {
        self.emit(event);
    }

    /// Locators of the loaded playlist.
    #[must_use]
    pub fn playlist(&self) -> Vec<String> {
        self.state.lock().items.clone()
    }

    /// Index of the current item.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.state.lock().index
    }

    /// Whether `prepare` was called since the last playlist load.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.state.lock().prepared
    }

    /// Whether `release` was called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Ends the current item as if it had played to completion.
    ///
    /// Repeat-one restarts the item, otherwise playback advances (wrapping
    /// under repeat-all). At the end of the playlist playback stops.
    pub fn finish_current(&self) {
        let event = {
            let mut state = self.state.lock();
            let Some(index) = state.index else {
                return;
            };

            if state.repeat_mode == RepeatMode::One {
                state.move_to(index, 0);
                PlayerEvent::TrackTransition {
                    index,
                    reason: TransitionReason::Repeat,
                }
            } else if let Some(next) = state.following_index() {
                state.move_to(next, 0);
                PlayerEvent::TrackTransition {
                    index: next,
                    reason: TransitionReason::Auto,
                }
            } else {
                state.base_position_ms = SIMULATED_TRACK_MS;
                state.playing_since = None;
                PlayerEvent::IsPlayingChanged(false)
            }
        };
        self.emit(event);
    }
}

impl PlaybackEngine for SimulatedPlayer {
    fn set_playlist(&self, locators: Vec<String>, start_index: usize, start_position_ms: u64) {
        let event = {
            let mut state = self.state.lock();
            state.prepared = false;
            if locators.is_empty() {
                state.items.clear();
                state.index = None;
                state.base_position_ms = 0;
                state.playing_since = None;
                None
            } else {
                let index = start_index.min(locators.len() - 1);
                state.items = locators;
                state.move_to(index, start_position_ms);
                Some(PlayerEvent::TrackTransition {
                    index,
                    reason: TransitionReason::PlaylistChanged,
                })
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn prepare(&self) {
        let ready = {
            let mut state = self.state.lock();
            state.prepared = state.index.is_some();
            state.prepared
        };
        if ready {
            self.emit(PlayerEvent::Ready {
                duration_ms: SIMULATED_TRACK_MS,
            });
        }
    }

    fn play(&self) {
        let started = {
            let mut state = self.state.lock();
            if state.index.is_some() && state.playing_since.is_none() {
                state.playing_since = Some(Instant::now());
                true
            } else {
                false
            }
        };
        if started {
            self.emit(PlayerEvent::IsPlayingChanged(true));
        }
    }

    fn pause(&self) {
        let stopped = {
            let mut state = self.state.lock();
            if state.playing_since.is_some() {
                state.base_position_ms = state.position_ms();
                state.playing_since = None;
                true
            } else {
                false
            }
        };
        if stopped {
            self.emit(PlayerEvent::IsPlayingChanged(false));
        }
    }

    fn seek_to_item(&self, index: usize, position_ms: u64) {
        let moved = {
            let mut state = self.state.lock();
            if index < state.items.len() {
                state.move_to(index, position_ms);
                true
            } else {
                false
            }
        };
        if moved {
            self.emit(PlayerEvent::TrackTransition {
                index,
                reason: TransitionReason::Seek,
            });
        }
    }

    fn seek_to(&self, position_ms: u64) {
        let mut state = self.state.lock();
        if let Some(index) = state.index {
            state.move_to(index, position_ms);
        }
    }

    fn next(&self) {
        let moved = {
            let mut state = self.state.lock();
            let next = state.following_index();
            if let Some(next) = next {
                state.move_to(next, 0);
            }
            next
        };
        if let Some(index) = moved {
            self.emit(PlayerEvent::TrackTransition {
                index,
                reason: TransitionReason::Skip,
            });
        }
    }

    fn previous(&self) {
        let moved = {
            let mut state = self.state.lock();
            let Some(index) = state.index else {
                return;
            };
            let target = if state.position_ms() > PREVIOUS_RESTART_THRESHOLD_MS {
                None
            } else if index > 0 {
                Some(index - 1)
            } else if state.repeat_mode == RepeatMode::All {
                Some(state.items.len() - 1)
            } else {
                None
            };
            match target {
                Some(target) => state.move_to(target, 0),
                None => state.move_to(index, 0),
            }
            target
        };
        if let Some(index) = moved {
            self.emit(PlayerEvent::TrackTransition {
                index,
                reason: TransitionReason::Skip,
            });
        }
    }

    fn position_ms(&self) -> u64 {
        self.state.lock().position_ms()
    }

    fn duration_ms(&self) -> u64 {
        if self.state.lock().index.is_some() {
            SIMULATED_TRACK_MS
        } else {
            0
        }
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing_since.is_some()
    }

    fn repeat_mode(&self) -> RepeatMode {
        self.state.lock().repeat_mode
    }

    fn set_repeat_mode(&self, mode: RepeatMode) {
        self.state.lock().repeat_mode = mode;
    }

    fn shuffle(&self) -> bool {
        self.state.lock().shuffle
    }

    fn set_shuffle(&self, enabled: bool) {
        self.state.lock().shuffle = enabled;
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.released = true;
            state.items.clear();
            state.index = None;
            state.playing_since = None;
        }
        self.events_tx.close();
    }
}

/// Connector handing out a [`SimulatedPlayer`] after an optional delay.
pub struct SimulatedConnector {
    /// The player every successful handshake returns.
    player: Arc<SimulatedPlayer>,
    /// Notification receiver shared with the session.
    events: Receiver<PlayerEvent>,
    /// Handshake latency.
    delay: Duration,
    /// Number of handshakes that still fail before one succeeds.
    failures_remaining: AtomicUsize,
}

impl SimulatedConnector {
    /// Creates a connector that succeeds immediately.
    #[must_use]
    pub fn new(player: Arc<SimulatedPlayer>, events: Receiver<PlayerEvent>) -> Self {
        Self {
            player,
            events,
            delay: Duration::ZERO,
            failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Delays every handshake.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes the next `failures` handshakes fail.
    #[must_use]
    pub fn with_failures(self, failures: usize) -> Self {
        self.failures_remaining.store(failures, SeqCst);
        self
    }
}

#[async_trait]
impl PlayerConnector for SimulatedConnector {
    async fn connect(&self) -> Result<PlayerConnection, SessionError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(SeqCst, SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SessionError::ConnectionFailed {
                reason: "simulated handshake failure".to_string(),
            });
        }

        Ok(PlayerConnection {
            engine: self.player.clone(),
            events: self.events.clone(),
        })
    }
}
