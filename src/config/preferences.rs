//! Typed access to persisted session state.
//!
//! `Preferences` layers per-key types and defaults over any
//! [`PreferenceStore`]. Reads never fail: an absent key, a value of the wrong
//! type or a store error all resolve to the key's default.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use tracing::debug;

use crate::{
    config::settings::{KeyFamily, PreferenceKey, PreferenceStore, PreferenceValue, SettingsError},
    error::operational::ErrorReporter,
    library::models::{SortOrder, TrackId, TrackOverride},
    playback::engine::RepeatMode,
    state::session_state::Route,
};

/// Default UI language tag.
pub const DEFAULT_LANGUAGE: &str = "system";

/// Number of weekly activity buckets.
pub const WEEKDAYS: usize = 7;

/// Every scalar the session restores on cold start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPreferences {
    /// Last track that entered "now playing".
    pub last_song_id: Option<TrackId>,
    /// Last sampled playback position in milliseconds.
    pub last_position_ms: u64,
    /// Active sort order.
    pub sort_order: SortOrder,
    /// Shuffle flag.
    pub shuffle: bool,
    /// Repeat mode.
    pub repeat_mode: RepeatMode,
    /// Last visited screen.
    pub last_route: Option<Route>,
    /// Folder the importer is restricted to.
    pub music_directory: Option<PathBuf>,
    /// UI language tag.
    pub language: String,
    /// Remaining sleep-timer minutes (0 = off).
    pub sleep_timer_minutes: u32,
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            last_song_id: None,
            last_position_ms: 0,
            sort_order: SortOrder::Title,
            shuffle: false,
            repeat_mode: RepeatMode::All,
            last_route: None,
            music_directory: None,
            language: DEFAULT_LANGUAGE.to_string(),
            sleep_timer_minutes: 0,
        }
    }
}

/// Typed facade over a preference store.
#[derive(Clone)]
pub struct Preferences {
    /// Backing store.
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    async fn read(&self, key: PreferenceKey) -> Option<PreferenceValue> {
        ErrorReporter::absorb(self.store.get(key).await, "Reading preference").flatten()
    }

    async fn read_int(&self, key: PreferenceKey) -> Option<i64> {
        let value = self.read(key).await?;
        let int = value.as_int();
        if int.is_none() {
            debug!("Preference {} holds a non-integer value, using default", key);
        }
        int
    }

    async fn read_text(&self, key: PreferenceKey) -> Option<String> {
        match self.read(key).await? {
            PreferenceValue::Text(text) => Some(text),
            _ => {
                debug!("Preference {} holds a non-text value, using default", key);
                None
            }
        }
    }

    async fn read_count(&self, key: PreferenceKey) -> u32 {
        self.read_int(key)
            .await
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(0)
    }

    /// Loads every scalar of the session in one pass.
    pub async fn load_session(&self) -> SessionPreferences {
        SessionPreferences {
            last_song_id: self.last_song_id().await,
            last_position_ms: self.last_position_ms().await,
            sort_order: self.sort_order().await,
            shuffle: self.shuffle().await,
            repeat_mode: self.repeat_mode().await,
            last_route: self.last_route().await,
            music_directory: self.music_directory().await,
            language: self.language().await,
            sleep_timer_minutes: self.sleep_timer_minutes().await,
        }
    }

    /// Last track that entered "now playing".
    pub async fn last_song_id(&self) -> Option<TrackId> {
        self.read_int(PreferenceKey::LastSongId).await
    }

    /// Persists the last played track.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_last_song_id(&self, id: TrackId) -> Result<(), SettingsError> {
        self.store
            .set(PreferenceKey::LastSongId, PreferenceValue::Int(id))
            .await
    }

    /// Last sampled playback position (default 0).
    pub async fn last_position_ms(&self) -> u64 {
        self.read_int(PreferenceKey::LastPosition)
            .await
            .and_then(|value| u64::try_from(value).ok())
            .unwrap_or(0)
    }

    /// Persists the playback position.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_last_position_ms(&self, position_ms: u64) -> Result<(), SettingsError> {
        let value = i64::try_from(position_ms).map_err(|_| SettingsError::InvalidValue {
            reason: format!("position {position_ms} out of range"),
        })?;
        self.store
            .set(PreferenceKey::LastPosition, PreferenceValue::Int(value))
            .await
    }

    /// Active sort order (default by-title).
    pub async fn sort_order(&self) -> SortOrder {
        self.read_text(PreferenceKey::SortOrder)
            .await
            .and_then(|name| name.parse().ok())
            .unwrap_or_default()
    }

    /// Persists the sort order.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_sort_order(&self, sort_order: SortOrder) -> Result<(), SettingsError> {
        self.store
            .set(
                PreferenceKey::SortOrder,
                PreferenceValue::Text(sort_order.as_str().to_string()),
            )
            .await
    }

    /// Shuffle flag (default off).
    pub async fn shuffle(&self) -> bool {
        self.read(PreferenceKey::ShuffleMode)
            .await
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// Persists the shuffle flag.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_shuffle(&self, enabled: bool) -> Result<(), SettingsError> {
        self.store
            .set(PreferenceKey::ShuffleMode, PreferenceValue::Bool(enabled))
            .await
    }

    /// Repeat mode (default repeat-all).
    pub async fn repeat_mode(&self) -> RepeatMode {
        self.read_text(PreferenceKey::RepeatMode)
            .await
            .and_then(|name| name.parse().ok())
            .unwrap_or_default()
    }

    /// Persists the repeat mode.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), SettingsError> {
        self.store
            .set(
                PreferenceKey::RepeatMode,
                PreferenceValue::Text(mode.as_str().to_string()),
            )
            .await
    }

    /// Last visited screen (default none, meaning home).
    pub async fn last_route(&self) -> Option<Route> {
        self.read_text(PreferenceKey::LastRoute)
            .await
            .and_then(|name| name.parse().ok())
    }

    /// Persists the visited screen.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_last_route(&self, route: Route) -> Result<(), SettingsError> {
        self.store
            .set(
                PreferenceKey::LastRoute,
                PreferenceValue::Text(route.as_str().to_string()),
            )
            .await
    }

    /// Folder the importer is restricted to (default none).
    pub async fn music_directory(&self) -> Option<PathBuf> {
        self.read_text(PreferenceKey::MusicDirectory)
            .await
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    /// Persists the import folder.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the path is not valid UTF-8 or the store
    /// rejects the write.
    pub async fn set_music_directory(&self, path: PathBuf) -> Result<(), SettingsError> {
        let path = path.into_os_string().into_string().map_err(|path| {
            SettingsError::InvalidValue {
                reason: format!("folder {path:?} is not valid UTF-8"),
            }
        })?;
        self.store
            .set(PreferenceKey::MusicDirectory, PreferenceValue::Text(path))
            .await
    }

    /// UI language tag (default `system`).
    pub async fn language(&self) -> String {
        self.read_text(PreferenceKey::AppLanguage)
            .await
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }

    /// Persists the UI language.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_language(&self, language: &str) -> Result<(), SettingsError> {
        self.store
            .set(
                PreferenceKey::AppLanguage,
                PreferenceValue::Text(language.to_string()),
            )
            .await
    }

    /// Remaining sleep-timer minutes (default 0).
    pub async fn sleep_timer_minutes(&self) -> u32 {
        self.read_count(PreferenceKey::SleepTimerMinutes).await
    }

    /// Persists the remaining sleep-timer minutes.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_sleep_timer_minutes(&self, minutes: u32) -> Result<(), SettingsError> {
        self.store
            .set(
                PreferenceKey::SleepTimerMinutes,
                PreferenceValue::Int(i64::from(minutes)),
            )
            .await
    }

    /// Play count of one track (default 0).
    pub async fn play_count(&self, id: TrackId) -> u32 {
        self.read_count(PreferenceKey::PlayCount(id)).await
    }

    /// Play counts of several tracks; tracks never played are omitted.
    pub async fn play_counts(&self, ids: impl IntoIterator<Item = TrackId>) -> HashMap<TrackId, u32> {
        let mut counts = HashMap::new();
        for id in ids {
            let count = self.play_count(id).await;
            if count > 0 {
                counts.insert(id, count);
            }
        }
        counts
    }

    /// Persists the play count of one track.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the write.
    pub async fn set_play_count(&self, id: TrackId, count: u32) -> Result<(), SettingsError> {
        self.store
            .set(PreferenceKey::PlayCount(id), PreferenceValue::Int(i64::from(count)))
            .await
    }

    /// Raw weekly activity buckets, Monday first.
    pub async fn weekly_activity(&self) -> [u32; WEEKDAYS] {
        let mut buckets = [0; WEEKDAYS];
        for (day, bucket) in (0_u8..).zip(buckets.iter_mut()) {
            *bucket = self.read_count(PreferenceKey::WeeklyActivity(day)).await;
        }
        buckets
    }

    /// Persists one weekly activity bucket.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the day is out of range or the store
    /// rejects the write.
    pub async fn set_weekly_activity(&self, day: u8, plays: u32) -> Result<(), SettingsError> {
        if usize::from(day) >= WEEKDAYS {
            return Err(SettingsError::InvalidValue {
                reason: format!("weekday {day} out of range"),
            });
        }
        self.store
            .set(
                PreferenceKey::WeeklyActivity(day),
                PreferenceValue::Int(i64::from(plays)),
            )
            .await
    }

    /// User override of one track, if both fields are stored.
    pub async fn track_override(&self, id: TrackId) -> Option<TrackOverride> {
        let title = self.read_text(PreferenceKey::OverrideTitle(id)).await?;
        let artist = self.read_text(PreferenceKey::OverrideArtist(id)).await?;
        Some(TrackOverride { title, artist })
    }

    /// Overrides of several tracks; tracks without one are omitted.
    pub async fn track_overrides(
        &self,
        ids: impl IntoIterator<Item = TrackId>,
    ) -> HashMap<TrackId, TrackOverride> {
        let mut overrides = HashMap::new();
        for id in ids {
            if let Some(track_override) = self.track_override(id).await {
                overrides.insert(id, track_override);
            }
        }
        overrides
    }

    /// Persists the override of one track.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects either write.
    pub async fn save_track_override(
        &self,
        id: TrackId,
        track_override: &TrackOverride,
    ) -> Result<(), SettingsError> {
        self.store
            .set(
                PreferenceKey::OverrideTitle(id),
                PreferenceValue::Text(track_override.title.clone()),
            )
            .await?;
        self.store
            .set(
                PreferenceKey::OverrideArtist(id),
                PreferenceValue::Text(track_override.artist.clone()),
            )
            .await
    }

    /// Removes all play counts and weekly activity.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the store rejects the removal.
    pub async fn reset_stats(&self) -> Result<usize, SettingsError> {
        self.store
            .remove_families(&[KeyFamily::PlayCount, KeyFamily::WeeklyActivity])
            .await
    }
}

/// Scales weekly buckets to `[0, 1]` by the largest bucket.
///
/// All-zero activity stays all zero.
#[must_use]
pub fn normalize_activity(buckets: &[u32; WEEKDAYS]) -> [f32; WEEKDAYS] {
    let max = buckets.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return [0.0; WEEKDAYS];
    }
    buckets.map(|plays| plays as f32 / max as f32)
}
