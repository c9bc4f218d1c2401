//! Key-value preference storage with XDG Base Directory compliance.
//!
//! Preferences are a flat map from typed keys to scalar values. Some keys are
//! fixed (`sort_order`, `last_position`, ...), others are derived from a
//! track id or a weekday and form key families that can be removed together.

use std::{
    collections::BTreeMap,
    env::var,
    fmt,
    fs::{create_dir_all, read_to_string},
    io::Error as StdError,
    path::PathBuf,
};

use {
    async_trait::async_trait,
    parking_lot::RwLock,
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tokio::{fs::write, sync::Mutex},
    tracing::debug,
};

use crate::library::models::TrackId;

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write the preference file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize preferences.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// A persisted scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Free text.
    Text(String),
}

impl PreferenceValue {
    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// Typed preference key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    /// Id of the last track that entered "now playing".
    LastSongId,
    /// Last sampled playback position in milliseconds.
    LastPosition,
    /// Active sort order name.
    SortOrder,
    /// Shuffle flag.
    ShuffleMode,
    /// Repeat mode name.
    RepeatMode,
    /// Last visited screen.
    LastRoute,
    /// Folder the importer is restricted to.
    MusicDirectory,
    /// UI language tag.
    AppLanguage,
    /// Remaining sleep-timer minutes.
    SleepTimerMinutes,
    /// Play count of one track.
    PlayCount(TrackId),
    /// Plays recorded on one weekday (0 = Monday).
    WeeklyActivity(u8),
    /// Overridden title of one track.
    OverrideTitle(TrackId),
    /// Overridden artist of one track.
    OverrideArtist(TrackId),
}

/// Group of dynamically named keys sharing a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// All `play_count_<id>` keys.
    PlayCount,
    /// All `weekly_activity_<day>` keys.
    WeeklyActivity,
}

impl KeyFamily {
    /// String prefixes of the keys in this family.
    #[must_use]
    pub fn prefixes(self) -> &'static [&'static str] {
        match self {
            Self::PlayCount => &["play_count_"],
            Self::WeeklyActivity => &["weekly_activity_"],
        }
    }

    fn contains(self, key: &str) -> bool {
        self.prefixes().iter().any(|prefix| key.starts_with(prefix))
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastSongId => f.write_str("last_song_id"),
            Self::LastPosition => f.write_str("last_position"),
            Self::SortOrder => f.write_str("sort_order"),
            Self::ShuffleMode => f.write_str("shuffle_mode"),
            Self::RepeatMode => f.write_str("repeat_mode"),
            Self::LastRoute => f.write_str("last_route"),
            Self::MusicDirectory => f.write_str("music_dir"),
            Self::AppLanguage => f.write_str("app_language"),
            Self::SleepTimerMinutes => f.write_str("sleep_timer_minutes"),
            Self::PlayCount(id) => write!(f, "play_count_{id}"),
            Self::WeeklyActivity(day) => write!(f, "weekly_activity_{day}"),
            Self::OverrideTitle(id) => write!(f, "override_title_{id}"),
            Self::OverrideArtist(id) => write!(f, "override_artist_{id}"),
        }
    }
}

/// Asynchronous key-to-scalar store.
///
/// Writes are not guaranteed to be visible to a concurrent read until the
/// write's own future has completed.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Reads a value; `None` when the key is absent.
    async fn get(&self, key: PreferenceKey) -> Result<Option<PreferenceValue>, SettingsError>;

    /// Writes a value.
    async fn set(&self, key: PreferenceKey, value: PreferenceValue) -> Result<(), SettingsError>;

    /// Removes every key of the given families in one step.
    ///
    /// # Returns
    ///
    /// The number of removed keys.
    async fn remove_families(&self, families: &[KeyFamily]) -> Result<usize, SettingsError>;
}

fn remove_matching(values: &mut BTreeMap<String, PreferenceValue>, families: &[KeyFamily]) -> usize {
    let before = values.len();
    values.retain(|key, _| !families.iter().any(|family| family.contains(key)));
    before - values.len()
}

/// Preference store kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    /// Stored values keyed by rendered key.
    values: RwLock<BTreeMap<String, PreferenceValue>>,
}

impl MemoryPreferenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, key: PreferenceKey) -> Result<Option<PreferenceValue>, SettingsError> {
        Ok(self.values.read().get(&key.to_string()).cloned())
    }

    async fn set(&self, key: PreferenceKey, value: PreferenceValue) -> Result<(), SettingsError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_families(&self, families: &[KeyFamily]) -> Result<usize, SettingsError> {
        Ok(remove_matching(&mut self.values.write(), families))
    }
}

/// Preference store persisted as a JSON document.
///
/// Values are served from memory; every mutation rewrites the whole file.
/// Rewrites are serialized so the file always ends up holding the newest
/// snapshot.
#[derive(Debug)]
pub struct JsonPreferenceStore {
    /// Current values keyed by rendered key.
    values: RwLock<BTreeMap<String, PreferenceValue>>,
    /// Path to the preference file on disk.
    config_path: PathBuf,
    /// Serializes file rewrites.
    write_lock: Mutex<()>,
}

impl JsonPreferenceStore {
    /// Opens the store at the default XDG location.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the existing file cannot be read or parsed.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Opens the store at a custom path.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Location of the JSON document.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the parent directory cannot be created or
    /// the existing file cannot be read or parsed.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, SettingsError> {
        if let Some(parent) = config_path.parent() {
            create_dir_all(parent)?;
        }

        let values = if config_path.exists() {
            debug!("Loading preferences from existing file: {:?}", config_path);
            from_str(&read_to_string(&config_path)?)?
        } else {
            debug!("No preference file yet at {:?}, starting empty", config_path);
            BTreeMap::new()
        };

        Ok(Self {
            values: RwLock::new(values),
            config_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Gets the preference file path.
    #[must_use]
    pub fn get_config_path(&self) -> &PathBuf {
        &self.config_path
    }

    async fn persist(&self) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;
        let contents = to_string_pretty(&*self.values.read())?;
        write(&self.config_path, contents).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for JsonPreferenceStore {
    async fn get(&self, key: PreferenceKey) -> Result<Option<PreferenceValue>, SettingsError> {
        Ok(self.values.read().get(&key.to_string()).cloned())
    }

    async fn set(&self, key: PreferenceKey, value: PreferenceValue) -> Result<(), SettingsError> {
        self.values.write().insert(key.to_string(), value);
        self.persist().await
    }

    async fn remove_families(&self, families: &[KeyFamily]) -> Result<usize, SettingsError> {
        let removed = remove_matching(&mut self.values.write(), families);
        debug!("Removed {} preference keys", removed);
        self.persist().await?;
        Ok(removed)
    }
}

/// Ensures proper XDG directory usage for the preference file.
///
/// # Returns
///
/// The path to the preference file.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push("cadenza");
    config_dir.push("preferences.json");
    config_dir
}

/// Gets the XDG config home directory.
///
/// Uses `XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
fn get_xdg_config_home() -> PathBuf {
    if let Ok(config_home) = var("XDG_CONFIG_HOME")
        && !config_home.is_empty()
    {
        return PathBuf::from(config_home);
    }

    if let Ok(home) = var("HOME") {
        let mut path = PathBuf::from(home);
        path.push(".config");
        return path;
    }

    PathBuf::from(".")
}
