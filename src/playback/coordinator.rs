//! Playback session coordinator.
//!
//! The coordinator keeps the external player's playlist and the session's
//! notion of "now playing" consistent, persists resume state, and owns the
//! position sampler and sleep timer.
//!
//! All session state lives in a single actor task. The public
//! [`SessionCoordinator`] handle only posts messages to it; background work
//! (library import, player handshake, artwork colors, player notifications,
//! timers) reports back through the same inbox, so state is only ever
//! touched by the actor and no locking is needed.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use {
    async_channel::{Receiver, Sender, unbounded},
    chrono::{Datelike, Local},
    tokio::{
        spawn,
        sync::{broadcast, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info},
};

use crate::{
    config::preferences::{Preferences, WEEKDAYS, normalize_activity},
    error::{domain::SessionError, operational::ErrorReporter},
    library::{
        importer::TrackImporter,
        models::{SortOrder, Track, TrackId, TrackOverride},
        projection::{DAILY_MIX_SIZE, LibraryProjection},
    },
    playback::{
        artwork::{AccentColor, ArtworkColorExtractor},
        engine::{PlaybackEngine, PlayerConnection, PlayerConnector, PlayerEvent, RepeatMode},
        position::PositionSampler,
        sleep_timer::{SleepTimer, SleepTimerEvent},
    },
    state::session_state::{ConnectionState, Route, SessionEvent, SessionSnapshot},
};

/// Timing and sizing knobs of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How often the playback position is persisted while playing.
    pub position_sample_interval: Duration,
    /// How often a running sleep timer recomputes the remaining minutes.
    pub sleep_tick_interval: Duration,
    /// Maximum number of tracks in the daily mix.
    pub daily_mix_size: usize,
    /// Capacity of the session event broadcast.
    pub event_capacity: usize,
    /// Accent color used when the artwork yields none.
    pub default_accent: AccentColor,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            position_sample_interval: Duration::from_secs(1),
            sleep_tick_interval: Duration::from_secs(1),
            daily_mix_size: DAILY_MIX_SIZE,
            event_capacity: 64,
            default_accent: AccentColor::DEFAULT,
        }
    }
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionDependencies {
    /// Source of the raw track list.
    pub importer: Arc<dyn TrackImporter>,
    /// Platform player handshake.
    pub connector: Arc<dyn PlayerConnector>,
    /// Persisted session state.
    pub preferences: Preferences,
    /// Accent color derivation.
    pub colors: Arc<dyn ArtworkColorExtractor>,
}

/// Messages processed by the session actor.
enum SessionMessage {
    Play(TrackId),
    TogglePlay,
    Next,
    Previous,
    ToggleRepeat,
    ToggleShuffle,
    SeekTo(u64),
    SetSleepTimer(u32),
    UpdateSortOrder(SortOrder),
    UpdateSearchQuery(String),
    UpdateTrackInfo {
        id: TrackId,
        track_override: TrackOverride,
    },
    UpdateFolder(PathBuf),
    RefreshLibrary,
    UpdateLanguage(String),
    UpdateRoute(Route),
    ResetStats,
    Reconnect,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Dispose,
    Connected(Result<PlayerConnection, SessionError>),
    ImportCompleted {
        generation: u64,
        stats_epoch: u64,
        tracks: Vec<Track>,
        play_counts: HashMap<TrackId, u32>,
        overrides: HashMap<TrackId, TrackOverride>,
    },
    AccentResolved {
        track_id: TrackId,
        color: Option<AccentColor>,
    },
    SamplePosition,
    SleepTimer(SleepTimerEvent),
    Player(PlayerEvent),
}

/// Disposes the session when the last handle goes away.
struct DisposeOnDrop {
    inbox: Sender<SessionMessage>,
}

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        let _ = self.inbox.try_send(SessionMessage::Dispose);
    }
}

/// Handle to a running playback session.
///
/// Commands are fire-and-forget: they are queued for the session loop and
/// return immediately. Every command fails with [`SessionError::Disposed`]
/// once the session has shut down.
#[derive(Clone)]
pub struct SessionCoordinator {
    /// Session loop inbox.
    inbox: Sender<SessionMessage>,
    /// Session change notifications.
    events: broadcast::Sender<SessionEvent>,
    /// Shared by all clones; disposes the session on last drop.
    _guard: Arc<DisposeOnDrop>,
}

impl SessionCoordinator {
    /// Starts a session.
    ///
    /// The player handshake and the first library import begin immediately
    /// and race each other; the playlist is pushed once both have completed.
    ///
    /// # Arguments
    ///
    /// * `dependencies` - External collaborators
    /// * `config` - Timing and sizing knobs
    ///
    /// # Returns
    ///
    /// A handle to the running session.
    #[must_use]
    pub fn spawn(dependencies: SessionDependencies, config: CoordinatorConfig) -> Self {
        let (inbox, inbox_rx) = unbounded();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let actor = SessionActor::new(dependencies, config, inbox.clone(), events.clone());
        spawn(actor.run(inbox_rx));

        Self {
            inbox: inbox.clone(),
            events,
            _guard: Arc::new(DisposeOnDrop { inbox }),
        }
    }

    fn send(&self, message: SessionMessage) -> Result<(), SessionError> {
        self.inbox
            .try_send(message)
            .map_err(|_| SessionError::Disposed)
    }

    /// Subscribes to session change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether the session has shut down.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Captures every observable field.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionMessage::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| SessionError::Disposed)
    }

    /// Plays `track` from the start.
    ///
    /// Tracks hidden by the current search are ignored.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn play(&self, track: &Track) -> Result<(), SessionError> {
        self.send(SessionMessage::Play(track.id))
    }

    /// Pauses when playing, resumes otherwise.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn toggle_play(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::TogglePlay)
    }

    /// Skips to the next track.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn next(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::Next)
    }

    /// Skips to the previous track.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn previous(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::Previous)
    }

    /// Cycles the repeat mode off → all → one → off.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn toggle_repeat(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::ToggleRepeat)
    }

    /// Flips the shuffle flag.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn toggle_shuffle(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::ToggleShuffle)
    }

    /// Seeks within the current track.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn seek_to(&self, position_ms: u64) -> Result<(), SessionError> {
        self.send(SessionMessage::SeekTo(position_ms))
    }

    /// Starts a sleep countdown, replacing any running one. Zero disables it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn set_sleep_timer(&self, minutes: u32) -> Result<(), SessionError> {
        self.send(SessionMessage::SetSleepTimer(minutes))
    }

    /// Changes the library sort order and resyncs the player playlist.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn update_sort_order(&self, sort_order: SortOrder) -> Result<(), SessionError> {
        self.send(SessionMessage::UpdateSortOrder(sort_order))
    }

    /// Changes the search text.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn update_search_query(&self, query: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionMessage::UpdateSearchQuery(query.into()))
    }

    /// Stores a title and artist override for one track.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn update_track_info(
        &self,
        id: TrackId,
        title: impl Into<String>,
        artist: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send(SessionMessage::UpdateTrackInfo {
            id,
            track_override: TrackOverride {
                title: title.into(),
                artist: artist.into(),
            },
        })
    }

    /// Restricts the library to `folder` and re-imports.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn update_folder(&self, folder: PathBuf) -> Result<(), SessionError> {
        self.send(SessionMessage::UpdateFolder(folder))
    }

    /// Re-imports the library from the current folder.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn refresh_library(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::RefreshLibrary)
    }

    /// Persists the UI language.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn update_language(&self, language: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionMessage::UpdateLanguage(language.into()))
    }

    /// Persists the visited screen.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn update_route(&self, route: Route) -> Result<(), SessionError> {
        self.send(SessionMessage::UpdateRoute(route))
    }

    /// Clears all play counts and weekly activity.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn reset_stats(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::ResetStats)
    }

    /// Retries a failed player handshake.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has shut down.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::Reconnect)
    }

    /// Shuts the session down and releases the player.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the session has already shut down.
    pub fn dispose(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::Dispose)
    }
}

/// Sole owner of the session state.
struct SessionActor {
    deps: SessionDependencies,
    config: CoordinatorConfig,
    inbox: Sender<SessionMessage>,
    events: broadcast::Sender<SessionEvent>,

    projection: LibraryProjection,
    connection: ConnectionState,
    engine: Option<Arc<dyn PlaybackEngine>>,
    playlist_synced: bool,

    current_track: Option<Track>,
    is_playing: bool,
    duration_ms: u64,
    last_song_id: Option<TrackId>,
    last_position_ms: u64,
    repeat_mode: RepeatMode,
    shuffle: bool,
    accent_color: AccentColor,

    sleep_timer: Option<SleepTimer>,
    sleep_generation: u64,
    sleep_timer_minutes: u32,

    weekly_activity: [u32; WEEKDAYS],
    language: String,
    route: Route,
    music_directory: Option<PathBuf>,

    import_generation: u64,
    /// Bumped by every stats reset; play counts read before it are stale.
    stats_epoch: u64,
    sampler: Option<PositionSampler>,
    connect_task: Option<JoinHandle<()>>,
    import_task: Option<JoinHandle<()>>,
    accent_task: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl SessionActor {
    fn new(
        deps: SessionDependencies,
        config: CoordinatorConfig,
        inbox: Sender<SessionMessage>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            deps,
            config,
            inbox,
            events,
            projection: LibraryProjection::new(config.daily_mix_size),
            connection: ConnectionState::Uninitialized,
            engine: None,
            playlist_synced: false,
            current_track: None,
            is_playing: false,
            duration_ms: 0,
            last_song_id: None,
            last_position_ms: 0,
            repeat_mode: RepeatMode::default(),
            shuffle: false,
            accent_color: config.default_accent,
            sleep_timer: None,
            sleep_generation: 0,
            sleep_timer_minutes: 0,
            weekly_activity: [0; WEEKDAYS],
            language: String::new(),
            route: Route::default(),
            music_directory: None,
            import_generation: 0,
            stats_epoch: 0,
            sampler: None,
            connect_task: None,
            import_task: None,
            accent_task: None,
            forwarder: None,
        }
    }

    async fn run(mut self, inbox: Receiver<SessionMessage>) {
        self.start().await;

        while let Ok(message) = inbox.recv().await {
            if matches!(message, SessionMessage::Dispose) {
                break;
            }
            self.handle(message).await;
        }

        self.shutdown().await;
        inbox.close();
        // Drop queued messages so pending snapshot requests resolve.
        while inbox.try_recv().is_ok() {}
    }

    /// Restores persisted state and launches the background work.
    async fn start(&mut self) {
        let session = self.deps.preferences.load_session().await;
        self.last_song_id = session.last_song_id;
        self.last_position_ms = session.last_position_ms;
        self.projection.set_sort_order(session.sort_order);
        self.repeat_mode = session.repeat_mode;
        self.shuffle = session.shuffle;
        self.route = session.last_route.unwrap_or_default();
        self.music_directory = session.music_directory;
        self.language = session.language;
        self.weekly_activity = self.deps.preferences.weekly_activity().await;
        debug!(
            sort_order = %session.sort_order,
            repeat_mode = %session.repeat_mode,
            "Session preferences restored"
        );

        self.start_connect();
        self.start_import();

        let inbox = self.inbox.clone();
        self.sampler = Some(PositionSampler::start(
            self.config.position_sample_interval,
            move || inbox.try_send(SessionMessage::SamplePosition).is_ok(),
        ));

        if session.sleep_timer_minutes > 0 {
            self.start_sleep_timer(session.sleep_timer_minutes).await;
        }
    }

    async fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Play(id) => self.play(id).await,
            SessionMessage::TogglePlay => {
                if let Some(engine) = self.ready_engine() {
                    if engine.is_playing() {
                        engine.pause();
                    } else {
                        engine.play();
                    }
                }
            }
            SessionMessage::Next => {
                if let Some(engine) = self.ready_engine() {
                    engine.next();
                }
            }
            SessionMessage::Previous => {
                if let Some(engine) = self.ready_engine() {
                    engine.previous();
                }
            }
            SessionMessage::SeekTo(position_ms) => {
                if let Some(engine) = self.ready_engine() {
                    engine.seek_to(position_ms);
                }
            }
            SessionMessage::ToggleRepeat => self.toggle_repeat().await,
            SessionMessage::ToggleShuffle => self.toggle_shuffle().await,
            SessionMessage::SetSleepTimer(minutes) => self.start_sleep_timer(minutes).await,
            SessionMessage::UpdateSortOrder(sort_order) => self.update_sort_order(sort_order).await,
            SessionMessage::UpdateSearchQuery(query) => {
                self.projection.set_search_query(query);
                self.broadcast(SessionEvent::LibraryChanged);
            }
            SessionMessage::UpdateTrackInfo { id, track_override } => {
                self.update_track_info(id, track_override).await;
            }
            SessionMessage::UpdateFolder(folder) => {
                ErrorReporter::absorb(
                    self.deps.preferences.set_music_directory(folder.clone()).await,
                    "Persisting music folder",
                );
                self.music_directory = Some(folder);
                self.broadcast(SessionEvent::PreferencesChanged);
                self.start_import();
            }
            SessionMessage::RefreshLibrary => self.start_import(),
            SessionMessage::UpdateLanguage(language) => {
                ErrorReporter::absorb(
                    self.deps.preferences.set_language(&language).await,
                    "Persisting language",
                );
                self.language = language;
                self.broadcast(SessionEvent::PreferencesChanged);
            }
            SessionMessage::UpdateRoute(route) => {
                ErrorReporter::absorb(
                    self.deps.preferences.set_last_route(route).await,
                    "Persisting route",
                );
                self.route = route;
                self.broadcast(SessionEvent::PreferencesChanged);
            }
            SessionMessage::ResetStats => self.reset_stats().await,
            SessionMessage::Reconnect => {
                if matches!(self.connection, ConnectionState::Failed { .. }) {
                    self.start_connect();
                } else {
                    debug!(state = ?self.connection, "Ignoring reconnect");
                }
            }
            SessionMessage::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionMessage::Dispose => {}
            SessionMessage::Connected(result) => self.on_connected(result),
            SessionMessage::ImportCompleted {
                generation,
                stats_epoch,
                tracks,
                mut play_counts,
                overrides,
            } => {
                if generation != self.import_generation {
                    debug!(generation, "Discarding superseded import");
                    return;
                }
                if stats_epoch != self.stats_epoch {
                    debug!(generation, "Discarding play counts read before a stats reset");
                    play_counts.clear();
                }
                self.on_import_completed(tracks, play_counts, overrides);
            }
            SessionMessage::AccentResolved { track_id, color } => {
                if self.current_track.as_ref().map(|track| track.id) != Some(track_id) {
                    return;
                }
                let color = color.unwrap_or(self.config.default_accent);
                if color != self.accent_color {
                    self.accent_color = color;
                    self.broadcast(SessionEvent::AccentColorChanged(color));
                }
            }
            SessionMessage::SamplePosition => {
                if let Some(engine) = self.ready_engine()
                    && engine.is_playing()
                {
                    let position_ms = engine.position_ms();
                    self.last_position_ms = position_ms;
                    ErrorReporter::absorb(
                        self.deps.preferences.set_last_position_ms(position_ms).await,
                        "Persisting playback position",
                    );
                }
            }
            SessionMessage::SleepTimer(event) => self.on_sleep_timer(event).await,
            SessionMessage::Player(event) => self.on_player_event(event).await,
        }
    }

    fn broadcast(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn ready_engine(&self) -> Option<Arc<dyn PlaybackEngine>> {
        if self.connection.is_ready() {
            self.engine.clone()
        } else {
            None
        }
    }

    fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state.clone();
        self.broadcast(SessionEvent::ConnectionStateChanged(state));
    }

    fn start_connect(&mut self) {
        self.set_connection(ConnectionState::Connecting);
        let connector = self.deps.connector.clone();
        let inbox = self.inbox.clone();
        self.connect_task = Some(spawn(async move {
            let result = connector.connect().await;
            let _ = inbox.send(SessionMessage::Connected(result)).await;
        }));
    }

    fn on_connected(&mut self, result: Result<PlayerConnection, SessionError>) {
        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                ErrorReporter::error(&e.clone().into(), "Connecting to player");
                self.set_connection(ConnectionState::Failed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let engine = connection.engine;
        engine.set_repeat_mode(self.repeat_mode);
        engine.set_shuffle(self.shuffle);

        let events = connection.events;
        let inbox = self.inbox.clone();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.forwarder = Some(spawn(async move {
            while let Ok(event) = events.recv().await {
                if inbox.send(SessionMessage::Player(event)).await.is_err() {
                    break;
                }
            }
        }));

        self.engine = Some(engine);
        info!("Player connected");
        self.set_connection(ConnectionState::Ready);
        self.sync_playlist_if_ready();
    }

    fn start_import(&mut self) {
        self.import_generation += 1;
        let generation = self.import_generation;
        let stats_epoch = self.stats_epoch;
        if let Some(task) = self.import_task.take() {
            task.abort();
        }

        let importer = self.deps.importer.clone();
        let preferences = self.deps.preferences.clone();
        let folder = self.music_directory.clone();
        let inbox = self.inbox.clone();
        self.import_task = Some(spawn(async move {
            let tracks = match importer.fetch(folder.as_deref()).await {
                Ok(tracks) => tracks,
                Err(e) => {
                    ErrorReporter::warn(&e.into(), "Importing tracks");
                    Vec::new()
                }
            };
            let ids: Vec<TrackId> = tracks.iter().map(|track| track.id).collect();
            let play_counts = preferences.play_counts(ids.iter().copied()).await;
            let overrides = preferences.track_overrides(ids).await;
            let _ = inbox
                .send(SessionMessage::ImportCompleted {
                    generation,
                    stats_epoch,
                    tracks,
                    play_counts,
                    overrides,
                })
                .await;
        }));
    }

    /// Applies a finished import.
    ///
    /// Persisted counts and overrides only fill in tracks the session has no
    /// value for yet; anything recorded while the import ran wins.
    fn on_import_completed(
        &mut self,
        tracks: Vec<Track>,
        play_counts: HashMap<TrackId, u32>,
        overrides: HashMap<TrackId, TrackOverride>,
    ) {
        info!(tracks = tracks.len(), "Library import completed");
        self.projection.set_raw_tracks(tracks);
        self.projection.merge_play_counts(play_counts);
        self.projection.merge_overrides(overrides);
        self.broadcast(SessionEvent::LibraryChanged);

        if let Some(current_id) = self.current_track.as_ref().map(|track| track.id) {
            match self.projection.find(current_id) {
                Some(refreshed) if self.current_track.as_ref() != Some(&refreshed) => {
                    self.current_track = Some(refreshed.clone());
                    self.broadcast(SessionEvent::CurrentTrackChanged(Some(refreshed)));
                }
                Some(_) => {}
                None => self.clear_current_track(),
            }
        } else if let Some(track) = self.last_song_id.and_then(|id| self.projection.find(id)) {
            debug!(id = track.id, "Restoring last played track");
            self.set_current_track(track);
        }

        self.sync_playlist_if_ready();
    }

    /// Pushes the playlist once both a non-empty library and a player exist.
    ///
    /// The player always receives the sorted library without the search
    /// filter, so typing a query never reloads or interrupts playback.
    ///
    /// The first push resumes at the restored track and position without
    /// starting playback. Later pushes keep the current track, position and
    /// playing state; without a current track they load item 0 paused.
    fn sync_playlist_if_ready(&mut self) {
        let Some(engine) = self.ready_engine() else {
            debug!("Playlist sync deferred: player not ready");
            return;
        };
        if !self.projection.has_tracks() {
            debug!("Playlist sync deferred: library empty");
            return;
        }

        let ordered = self.projection.ordered_tracks();
        let index_of = |id: TrackId| ordered.iter().position(|track| track.id == id);
        let locators: Vec<String> = ordered.iter().map(|track| track.uri.clone()).collect();

        if self.playlist_synced {
            let current = self
                .current_track
                .as_ref()
                .and_then(|track| index_of(track.id));
            let (index, position_ms, resume) = match current {
                Some(index) => (index, engine.position_ms(), engine.is_playing()),
                None => (0, 0, false),
            };
            debug!(index, items = locators.len(), "Resyncing playlist");
            if !resume {
                engine.pause();
            }
            engine.set_playlist(locators, index, position_ms);
            engine.prepare();
            if resume {
                engine.play();
            }
        } else {
            let resume_id = self
                .current_track
                .as_ref()
                .map(|track| track.id)
                .or(self.last_song_id);
            let (index, position_ms) = resume_id
                .and_then(index_of)
                .map_or((0, 0), |index| (index, self.last_position_ms));
            info!(index, position_ms, items = locators.len(), "Loading playlist");
            engine.set_playlist(locators, index, position_ms);
            engine.prepare();
            self.playlist_synced = true;
        }
    }

    async fn play(&mut self, id: TrackId) {
        let Some(engine) = self.ready_engine() else {
            debug!(id, "Ignoring play: player not ready");
            return;
        };
        if !self
            .projection
            .visible_tracks()
            .iter()
            .any(|track| track.id == id)
        {
            debug!(id, "Ignoring play: track not visible");
            return;
        }
        let ordered = self.projection.ordered_tracks();
        let Some(index) = ordered.iter().position(|track| track.id == id) else {
            return;
        };

        let track = ordered[index].clone();
        self.set_current_track(track);
        engine.seek_to_item(index, 0);
        engine.play();
        self.record_play(id).await;
    }

    /// Makes `track` current and requests its accent color.
    fn set_current_track(&mut self, track: Track) {
        if let Some(task) = self.accent_task.take() {
            task.abort();
        }
        let colors = self.deps.colors.clone();
        let inbox = self.inbox.clone();
        let track_id = track.id;
        let album_art_uri = track.album_art_uri.clone();
        self.accent_task = Some(spawn(async move {
            let color = colors.extract(&album_art_uri).await;
            let _ = inbox
                .send(SessionMessage::AccentResolved { track_id, color })
                .await;
        }));

        self.current_track = Some(track.clone());
        self.broadcast(SessionEvent::CurrentTrackChanged(Some(track)));
    }

    /// Leaves "now playing" empty after its track disappeared from the
    /// library, pausing the player so it cannot keep playing something else.
    fn clear_current_track(&mut self) {
        if let Some(task) = self.accent_task.take() {
            task.abort();
        }
        if let Some(engine) = self.ready_engine() {
            engine.pause();
        }
        info!("Current track left the library");
        self.current_track = None;
        self.broadcast(SessionEvent::CurrentTrackChanged(None));
        if self.accent_color != self.config.default_accent {
            self.accent_color = self.config.default_accent;
            self.broadcast(SessionEvent::AccentColorChanged(self.accent_color));
        }
    }

    /// Counts a play of `id` and persists the counters.
    async fn record_play(&mut self, id: TrackId) {
        let count = self.projection.increment_play_count(id);
        let day = current_weekday();
        let bucket = &mut self.weekly_activity[usize::from(day)];
        *bucket = bucket.saturating_add(1);
        let plays = *bucket;
        self.last_song_id = Some(id);
        debug!(id, count, day, "Play recorded");

        let preferences = &self.deps.preferences;
        ErrorReporter::absorb(
            preferences.set_play_count(id, count).await,
            "Persisting play count",
        );
        ErrorReporter::absorb(
            preferences.set_weekly_activity(day, plays).await,
            "Persisting weekly activity",
        );
        ErrorReporter::absorb(
            preferences.set_last_song_id(id).await,
            "Persisting last played track",
        );
        self.broadcast(SessionEvent::LibraryChanged);
    }

    async fn on_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::TrackTransition { index, reason } => {
                // Seeks and playlist loads follow our own commands, which
                // already set the current track.
                if !reason.is_advance() {
                    return;
                }
                let Some(track) = self.projection.ordered_tracks().into_iter().nth(index) else {
                    debug!(index, ?reason, "Ignoring transition outside the playlist");
                    return;
                };
                let id = track.id;
                self.set_current_track(track);
                self.record_play(id).await;
            }
            PlayerEvent::IsPlayingChanged(playing) => {
                if playing != self.is_playing {
                    self.is_playing = playing;
                    self.broadcast(SessionEvent::PlaybackStateChanged(playing));
                }
            }
            PlayerEvent::Ready { duration_ms } => self.duration_ms = duration_ms,
        }
    }

    async fn toggle_repeat(&mut self) {
        self.repeat_mode = self.repeat_mode.cycle();
        ErrorReporter::absorb(
            self.deps.preferences.set_repeat_mode(self.repeat_mode).await,
            "Persisting repeat mode",
        );
        if let Some(engine) = self.ready_engine() {
            engine.set_repeat_mode(self.repeat_mode);
        }
        self.broadcast(SessionEvent::RepeatModeChanged(self.repeat_mode));
    }

    async fn toggle_shuffle(&mut self) {
        self.shuffle = !self.shuffle;
        ErrorReporter::absorb(
            self.deps.preferences.set_shuffle(self.shuffle).await,
            "Persisting shuffle mode",
        );
        if let Some(engine) = self.ready_engine() {
            engine.set_shuffle(self.shuffle);
        }
        self.broadcast(SessionEvent::ShuffleChanged(self.shuffle));
    }

    async fn update_sort_order(&mut self, sort_order: SortOrder) {
        ErrorReporter::absorb(
            self.deps.preferences.set_sort_order(sort_order).await,
            "Persisting sort order",
        );
        if sort_order == self.projection.sort_order() {
            return;
        }
        self.projection.set_sort_order(sort_order);
        self.broadcast(SessionEvent::LibraryChanged);
        self.sync_playlist_if_ready();
    }

    async fn update_track_info(&mut self, id: TrackId, track_override: TrackOverride) {
        ErrorReporter::absorb(
            self.deps
                .preferences
                .save_track_override(id, &track_override)
                .await,
            "Persisting track override",
        );

        let order_before = playback_order(&self.projection);
        self.projection.set_override(id, track_override);
        self.broadcast(SessionEvent::LibraryChanged);

        if self.current_track.as_ref().map(|track| track.id) == Some(id)
            && let Some(updated) = self.projection.find(id)
        {
            self.current_track = Some(updated.clone());
            self.broadcast(SessionEvent::CurrentTrackChanged(Some(updated)));
        }

        if playback_order(&self.projection) != order_before {
            self.sync_playlist_if_ready();
        }
    }

    async fn reset_stats(&mut self) {
        if let Some(removed) =
            ErrorReporter::absorb(self.deps.preferences.reset_stats().await, "Resetting stats")
        {
            info!(removed, "Stats reset");
        }
        self.stats_epoch += 1;
        self.projection.reset_play_counts();
        self.weekly_activity = [0; WEEKDAYS];
        self.broadcast(SessionEvent::LibraryChanged);
    }

    async fn start_sleep_timer(&mut self, minutes: u32) {
        self.sleep_generation += 1;
        self.sleep_timer = None;

        if minutes > 0 {
            let inbox = self.inbox.clone();
            self.sleep_timer = Some(SleepTimer::start(
                minutes,
                self.config.sleep_tick_interval,
                self.sleep_generation,
                move |event| {
                    let _ = inbox.try_send(SessionMessage::SleepTimer(event));
                },
            ));
            info!(minutes, "Sleep timer started");
        } else {
            debug!("Sleep timer cleared");
        }

        self.set_sleep_timer_minutes(minutes).await;
    }

    async fn set_sleep_timer_minutes(&mut self, minutes: u32) {
        self.sleep_timer_minutes = minutes;
        ErrorReporter::absorb(
            self.deps.preferences.set_sleep_timer_minutes(minutes).await,
            "Persisting sleep timer",
        );
        self.broadcast(SessionEvent::SleepTimerChanged {
            active: self.sleep_timer.is_some(),
            minutes,
        });
    }

    async fn on_sleep_timer(&mut self, event: SleepTimerEvent) {
        match event {
            SleepTimerEvent::Tick {
                generation,
                remaining_minutes,
            } => {
                if generation == self.sleep_generation
                    && remaining_minutes != self.sleep_timer_minutes
                {
                    self.set_sleep_timer_minutes(remaining_minutes).await;
                }
            }
            SleepTimerEvent::Expired { generation } => {
                if generation != self.sleep_generation {
                    return;
                }
                info!("Sleep timer expired, pausing playback");
                if let Some(engine) = self.ready_engine() {
                    engine.pause();
                }
                self.sleep_timer = None;
                self.set_sleep_timer_minutes(0).await;
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let engine = self.ready_engine();
        SessionSnapshot {
            connection: self.connection.clone(),
            visible_tracks: self.projection.visible_tracks(),
            daily_mix: self.projection.daily_mix(),
            stats: self.projection.stats(),
            current_track: self.current_track.clone(),
            is_playing: engine
                .as_ref()
                .map_or(self.is_playing, |engine| engine.is_playing()),
            position_ms: engine
                .as_ref()
                .map_or(self.last_position_ms, |engine| engine.position_ms()),
            duration_ms: engine
                .as_ref()
                .map_or(self.duration_ms, |engine| engine.duration_ms()),
            repeat_mode: self.repeat_mode,
            shuffle: self.shuffle,
            accent_color: self.accent_color,
            sleep_timer_active: self
                .sleep_timer
                .as_ref()
                .is_some_and(|timer| !timer.is_finished()),
            sleep_timer_minutes: self.sleep_timer_minutes,
            sort_order: self.projection.sort_order(),
            search_query: self.projection.search_query().to_string(),
            weekly_activity: normalize_activity(&self.weekly_activity),
            language: self.language.clone(),
            route: self.route,
            music_directory: self.music_directory.clone(),
        }
    }

    async fn shutdown(&mut self) {
        self.sampler = None;
        self.sleep_timer = None;
        for task in [
            self.connect_task.take(),
            self.import_task.take(),
            self.accent_task.take(),
            self.forwarder.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }

        if let Some(engine) = self.engine.take() {
            if self.playlist_synced {
                ErrorReporter::absorb(
                    self.deps
                        .preferences
                        .set_last_position_ms(engine.position_ms())
                        .await,
                    "Persisting playback position",
                );
            }
            engine.release();
        }
        self.set_connection(ConnectionState::Disposed);
        info!("Session disposed");
    }
}

/// Track ids in the order the player receives them.
fn playback_order(projection: &LibraryProjection) -> Vec<TrackId> {
    projection
        .ordered_tracks()
        .iter()
        .map(|track| track.id)
        .collect()
}

/// Weekly activity bucket of today, Monday = 0.
fn current_weekday() -> u8 {
    u8::try_from(Local::now().weekday().num_days_from_monday()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc, time::Duration};

    use {
        async_trait::async_trait,
        tokio::{sync::broadcast::error::TryRecvError, time::sleep},
    };

    use crate::{
        config::{
            preferences::Preferences,
            settings::{
                KeyFamily, MemoryPreferenceStore, PreferenceKey, PreferenceStore,
                PreferenceValue, SettingsError,
            },
        },
        error::domain::SessionError,
        library::{
            importer::StaticImporter,
            models::{SortOrder, Track},
        },
        playback::{
            artwork::{AccentColor, PaletteLookup},
            coordinator::{CoordinatorConfig, SessionCoordinator, SessionDependencies},
            engine::{PlaybackEngine, PlayerEvent, RepeatMode, TransitionReason},
            simulated::{SimulatedConnector, SimulatedPlayer},
        },
        state::session_state::{ConnectionState, Route, SessionEvent},
    };

    const ZETA_RED: AccentColor = AccentColor(0xFFFF_0000);

    fn track(id: i64, title: &str, artist: &str) -> Track {
        Track {
            id,
            title: title.to_string(),
            artist: artist.to_string(),
            uri: format!("/music/jazz/{id}.flac"),
            album_id: 1,
            album_art_uri: format!("/music/jazz/{id}.jpg"),
            date_added: id,
        }
    }

    /// Zeta(1), Alpha(2), Mu(3); by title the order is 2, 3, 1.
    fn library() -> Vec<Track> {
        vec![
            track(1, "Zeta", "Miles Davis"),
            track(2, "Alpha", "John Coltrane"),
            track(3, "Mu", "Miles Davis"),
        ]
    }

    struct Session {
        coordinator: SessionCoordinator,
        player: Arc<SimulatedPlayer>,
        preferences: Preferences,
    }

    struct Setup {
        tracks: Vec<Track>,
        import_delay: Duration,
        connect_delay: Duration,
        connect_failures: usize,
        store: Arc<dyn PreferenceStore>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                tracks: library(),
                import_delay: Duration::ZERO,
                connect_delay: Duration::ZERO,
                connect_failures: 0,
                store: Arc::new(MemoryPreferenceStore::new()),
            }
        }
    }

    fn start(setup: Setup) -> Session {
        let (player, events) = SimulatedPlayer::new();
        let connector = SimulatedConnector::new(player.clone(), events)
            .with_delay(setup.connect_delay)
            .with_failures(setup.connect_failures);
        let preferences = Preferences::new(setup.store);
        let dependencies = SessionDependencies {
            importer: Arc::new(StaticImporter::new(setup.tracks).with_delay(setup.import_delay)),
            connector: Arc::new(connector),
            preferences: preferences.clone(),
            colors: Arc::new(PaletteLookup::new([(
                "/music/jazz/1.jpg".to_string(),
                ZETA_RED,
            )])),
        };
        Session {
            coordinator: SessionCoordinator::spawn(dependencies, CoordinatorConfig::default()),
            player,
            preferences,
        }
    }

    /// Memory store whose override reads lag, so an import stays in flight
    /// after it has read the play counts.
    struct SlowOverrideStore {
        inner: MemoryPreferenceStore,
        delay: Duration,
    }

    #[async_trait]
    impl PreferenceStore for SlowOverrideStore {
        async fn get(&self, key: PreferenceKey) -> Result<Option<PreferenceValue>, SettingsError> {
            if matches!(key, PreferenceKey::OverrideTitle(_)) {
                sleep(self.delay).await;
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: PreferenceKey, value: PreferenceValue) -> Result<(), SettingsError> {
            self.inner.set(key, value).await
        }

        async fn remove_families(&self, families: &[KeyFamily]) -> Result<usize, SettingsError> {
            self.inner.remove_families(families).await
        }
    }

    fn slow_override_store() -> Arc<dyn PreferenceStore> {
        Arc::new(SlowOverrideStore {
            inner: MemoryPreferenceStore::new(),
            delay: Duration::from_millis(100),
        })
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    fn uri(id: i64) -> String {
        format!("/music/jazz/{id}.flac")
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_finishing_after_connection_loads_playlist() {
        let session = start(Setup {
            import_delay: Duration::from_millis(500),
            ..Setup::default()
        });

        settle().await;
        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.connection, ConnectionState::Ready);
        assert!(session.player.playlist().is_empty());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(session.player.playlist(), vec![uri(2), uri(3), uri(1)]);
        assert!(session.player.is_prepared());
        assert!(!session.player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_finishing_after_import_loads_playlist() {
        let session = start(Setup {
            connect_delay: Duration::from_millis(500),
            ..Setup::default()
        });

        settle().await;
        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.connection, ConnectionState::Connecting);
        assert_eq!(snapshot.visible_tracks.len(), 3);
        assert!(session.player.playlist().is_empty());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(session.player.playlist(), vec![uri(2), uri(3), uri(1)]);
        assert_eq!(session.player.current_index(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_import_defers_playlist_until_tracks_arrive() {
        let store = Arc::new(MemoryPreferenceStore::new());
        Preferences::new(store.clone())
            .set_music_directory(PathBuf::from("/music/rock"))
            .await
            .unwrap();
        let session = start(Setup {
            store,
            ..Setup::default()
        });

        settle().await;
        assert!(session.player.playlist().is_empty());
        assert!(session.coordinator.snapshot().await.unwrap().visible_tracks.is_empty());

        session
            .coordinator
            .update_folder(PathBuf::from("/music/jazz"))
            .unwrap();
        settle().await;
        assert_eq!(session.player.playlist().len(), 3);
        assert_eq!(
            session.preferences.music_directory().await,
            Some(PathBuf::from("/music/jazz"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_counts_and_persists() {
        let session = start(Setup::default());
        settle().await;
        let tracks = library();

        for _ in 0..3 {
            session.coordinator.play(&tracks[1]).unwrap();
        }
        session.coordinator.play(&tracks[0]).unwrap();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.stats.total_plays, 4);
        assert_eq!(snapshot.stats.top_artist.as_deref(), Some("John Coltrane"));
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(1));
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.daily_mix[0].id, 2);
        assert!(snapshot.weekly_activity.contains(&1.0));

        assert_eq!(session.preferences.play_count(2).await, 3);
        assert_eq!(session.preferences.play_count(1).await, 1);
        assert_eq!(session.preferences.last_song_id().await, Some(1));
        assert_eq!(session.preferences.weekly_activity().await.iter().sum::<u32>(), 4);
        assert_eq!(session.player.current_index(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_of_filtered_out_track_is_ignored() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.update_search_query("zeta").unwrap();
        session.coordinator.play(&library()[1]).unwrap();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(
            snapshot
                .visible_tracks
                .iter()
                .map(|track| track.id)
                .collect::<Vec<_>>(),
            vec![1]
        );
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.stats.total_plays, 0);
        assert_eq!(session.preferences.play_count(2).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_advance_counts_new_track() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[1]).unwrap();
        settle().await;
        session.player.finish_current();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(3));
        assert_eq!(snapshot.stats.total_plays, 2);
        assert_eq!(session.preferences.play_count(2).await, 1);
        assert_eq!(session.preferences.play_count(3).await, 1);
        assert_eq!(session.preferences.last_song_id().await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_counts_skip_target() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[2]).unwrap();
        session.coordinator.next().unwrap();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(1));
        assert_eq!(session.preferences.play_count(1).await, 1);
        assert_eq!(session.preferences.play_count(3).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sort_change_resyncs_playlist() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        settle().await;
        session.coordinator.update_sort_order(SortOrder::Artist).unwrap();
        settle().await;

        assert_eq!(session.player.playlist(), vec![uri(2), uri(1), uri(3)]);
        assert_eq!(session.player.current_index(), Some(1));
        assert!(session.player.is_playing());

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(1));
        assert_eq!(snapshot.sort_order, SortOrder::Artist);
        assert_eq!(snapshot.stats.total_plays, 1);
        assert_eq!(session.preferences.sort_order().await, SortOrder::Artist);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_renames_and_reorders() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[1]).unwrap();
        session
            .coordinator
            .update_track_info(1, "Aardvark", "Miles Davis")
            .unwrap();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.visible_tracks[0].id, 1);
        assert_eq!(snapshot.visible_tracks[0].title, "Aardvark");
        assert_eq!(session.player.playlist()[0], uri(1));
        assert_eq!(session.player.current_index(), Some(1));
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(2));
        assert_eq!(
            session
                .preferences
                .track_override(1)
                .await
                .map(|track_override| track_override.title),
            Some("Aardvark".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_timer_pauses_on_expiry() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        session.coordinator.set_sleep_timer(1).unwrap();
        sleep(Duration::from_secs(61)).await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert!(!snapshot.is_playing);
        assert!(!snapshot.sleep_timer_active);
        assert_eq!(snapshot.sleep_timer_minutes, 0);
        assert!(!session.player.is_playing());
        assert_eq!(session.preferences.sleep_timer_minutes().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_timer_rounds_remaining_minutes_up() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.set_sleep_timer(5).unwrap();
        sleep(Duration::from_secs(30)).await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert!(snapshot.sleep_timer_active);
        assert_eq!(snapshot.sleep_timer_minutes, 5);

        sleep(Duration::from_secs(60)).await;
        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.sleep_timer_minutes, 4);
        assert_eq!(session.preferences.sleep_timer_minutes().await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_timer_zero_cancels() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        session.coordinator.set_sleep_timer(1).unwrap();
        settle().await;
        session.coordinator.set_sleep_timer(0).unwrap();
        sleep(Duration::from_secs(90)).await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert!(!snapshot.sleep_timer_active);
        assert!(snapshot.is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stats_restores_import_order() {
        let session = start(Setup::default());
        settle().await;
        let tracks = library();

        session.coordinator.play(&tracks[2]).unwrap();
        session.coordinator.play(&tracks[2]).unwrap();
        session.coordinator.play(&tracks[1]).unwrap();
        settle().await;
        assert_eq!(
            session.coordinator.snapshot().await.unwrap().daily_mix[0].id,
            3
        );

        session.coordinator.reset_stats().unwrap();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.stats.total_plays, 0);
        assert_eq!(snapshot.stats.top_artist, None);
        assert_eq!(snapshot.weekly_activity, [0.0; 7]);
        assert_eq!(
            snapshot
                .daily_mix
                .iter()
                .map(|track| track.id)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(session.preferences.play_count(3).await, 0);
        assert_eq!(session.preferences.weekly_activity().await, [0; 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connection_can_be_retried() {
        let session = start(Setup {
            connect_failures: 1,
            ..Setup::default()
        });
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert!(matches!(snapshot.connection, ConnectionState::Failed { .. }));
        assert!(session.player.playlist().is_empty());

        session.coordinator.reconnect().unwrap();
        settle().await;
        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.connection, ConnectionState::Ready);
        assert_eq!(session.player.playlist().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_releases_player() {
        let session = start(Setup::default());
        let mut events = session.coordinator.subscribe();
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        sleep(Duration::from_secs(2)).await;
        session.coordinator.dispose().unwrap();
        settle().await;

        let persisted = session.preferences.last_position_ms().await;
        assert!(persisted > 0);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(session.preferences.last_position_ms().await, persisted);

        assert!(session.player.is_released());
        assert!(session.coordinator.is_disposed());
        assert_eq!(
            session.coordinator.play(&library()[0]),
            Err(SessionError::Disposed)
        );
        assert_eq!(
            session.coordinator.snapshot().await.err(),
            Some(SessionError::Disposed)
        );

        let mut last = None;
        loop {
            match events.try_recv() {
                Ok(event) => last = Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(
            last,
            Some(SessionEvent::ConnectionStateChanged(ConnectionState::Disposed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_restores_session() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let preferences = Preferences::new(store.clone());
        preferences.set_last_song_id(1).await.unwrap();
        preferences.set_last_position_ms(42_000).await.unwrap();
        preferences.set_sort_order(SortOrder::Artist).await.unwrap();
        preferences.set_repeat_mode(RepeatMode::One).await.unwrap();
        preferences.set_last_route(Route::Library).await.unwrap();

        let session = start(Setup {
            store: store.clone(),
            ..Setup::default()
        });
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(1));
        assert_eq!(snapshot.accent_color, ZETA_RED);
        assert_eq!(snapshot.repeat_mode, RepeatMode::One);
        assert_eq!(snapshot.route, Route::Library);
        assert_eq!(snapshot.stats.total_plays, 0);
        assert!(!snapshot.is_playing);

        assert_eq!(session.player.current_index(), Some(1));
        assert_eq!(session.player.position_ms(), 42_000);
        assert_eq!(session.player.repeat_mode(), RepeatMode::One);
        assert!(store.len() >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accent_falls_back_to_default() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        settle().await;
        assert_eq!(
            session.coordinator.snapshot().await.unwrap().accent_color,
            ZETA_RED
        );

        session.coordinator.play(&library()[1]).unwrap();
        settle().await;
        assert_eq!(
            session.coordinator.snapshot().await.unwrap().accent_color,
            AccentColor::DEFAULT
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggles_persist_and_apply() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.toggle_repeat().unwrap();
        session.coordinator.toggle_shuffle().unwrap();
        session.coordinator.update_language("de").unwrap();
        session.coordinator.update_route(Route::Settings).unwrap();
        settle().await;

        assert_eq!(session.preferences.repeat_mode().await, RepeatMode::One);
        assert!(session.preferences.shuffle().await);
        assert_eq!(session.preferences.language().await, "de");
        assert_eq!(session.preferences.last_route().await, Some(Route::Settings));
        assert_eq!(session.player.repeat_mode(), RepeatMode::One);
        assert!(session.player.shuffle());

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.language, "de");
        assert_eq!(snapshot.route, Route::Settings);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_is_sampled_while_playing() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        sleep(Duration::from_millis(5_500)).await;

        let persisted = session.preferences.last_position_ms().await;
        assert!(persisted >= 4_000);
        assert!(persisted <= session.player.position_ms());

        session.coordinator.toggle_play().unwrap();
        settle().await;
        assert!(!session.player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_broadcasts_current_track() {
        let session = start(Setup::default());
        settle().await;
        let mut events = session.coordinator.subscribe();

        session.coordinator.play(&library()[0]).unwrap();
        settle().await;

        let received: Vec<SessionEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(received.contains(&SessionEvent::CurrentTrackChanged(Some(library()[0].clone()))));
        assert!(received.contains(&SessionEvent::PlaybackStateChanged(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_during_refresh_keeps_count() {
        let session = start(Setup {
            store: slow_override_store(),
            ..Setup::default()
        });
        sleep(Duration::from_secs(1)).await;
        let zeta = &library()[0];

        session.coordinator.refresh_library().unwrap();
        settle().await;
        session.coordinator.play(zeta).unwrap();
        settle().await;
        assert_eq!(session.preferences.play_count(1).await, 1);

        sleep(Duration::from_secs(1)).await;
        session.coordinator.play(zeta).unwrap();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.stats.total_plays, 2);
        assert_eq!(session.preferences.play_count(1).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_refresh_stays_reset() {
        let session = start(Setup {
            store: slow_override_store(),
            ..Setup::default()
        });
        sleep(Duration::from_secs(1)).await;

        session.coordinator.play(&library()[0]).unwrap();
        session.coordinator.play(&library()[0]).unwrap();
        settle().await;
        session.coordinator.refresh_library().unwrap();
        settle().await;
        session.coordinator.reset_stats().unwrap();
        sleep(Duration::from_secs(1)).await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.stats.total_plays, 0);
        assert_eq!(snapshot.visible_tracks.len(), 3);

        session.coordinator.play(&library()[0]).unwrap();
        settle().await;
        assert_eq!(session.preferences.play_count(1).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reimport_without_current_track_pauses() {
        let mut tracks = library();
        tracks.push(Track {
            uri: "/music/rock/4.flac".to_string(),
            ..track(4, "Omega", "Sonic Youth")
        });
        let session = start(Setup {
            tracks,
            ..Setup::default()
        });
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        settle().await;
        assert_eq!(
            session.coordinator.snapshot().await.unwrap().accent_color,
            ZETA_RED
        );

        session
            .coordinator
            .update_folder(PathBuf::from("/music/rock"))
            .unwrap();
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.current_track, None);
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.accent_color, AccentColor::DEFAULT);
        assert_eq!(snapshot.visible_tracks.len(), 1);
        assert_eq!(session.player.playlist(), vec!["/music/rock/4.flac".to_string()]);
        assert_eq!(session.player.current_index(), Some(0));
        assert!(!session.player.is_playing());
        assert_eq!(session.preferences.play_count(4).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_outside_playlist_is_ignored() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[1]).unwrap();
        settle().await;
        session.player.notify(PlayerEvent::TrackTransition {
            index: library().len() + 2,
            reason: TransitionReason::Auto,
        });
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(2));
        assert_eq!(snapshot.stats.total_plays, 1);
        assert_eq!(session.preferences.play_count(2).await, 1);
        assert_eq!(session.preferences.last_song_id().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_seek_after_resort_is_ignored() {
        let session = start(Setup::default());
        settle().await;

        session.coordinator.play(&library()[0]).unwrap();
        settle().await;
        session.coordinator.update_sort_order(SortOrder::Artist).unwrap();
        settle().await;
        // Index of Zeta under the previous title order.
        session.player.notify(PlayerEvent::TrackTransition {
            index: 2,
            reason: TransitionReason::Seek,
        });
        settle().await;

        let snapshot = session.coordinator.snapshot().await.unwrap();
        assert_eq!(snapshot.current_track.map(|track| track.id), Some(1));
        assert_eq!(snapshot.stats.total_plays, 1);
        assert_eq!(session.player.current_index(), Some(1));
    }
}
