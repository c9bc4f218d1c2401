//! Persistent preferences and session state.
//!
//! `settings` provides the key-value stores (JSON file with XDG Base
//! Directory compliance, or in memory); `preferences` adds typed accessors
//! with a default for every key.

pub mod preferences;
pub mod settings;

pub use {
    preferences::{Preferences, SessionPreferences, normalize_activity},
    settings::{
        JsonPreferenceStore, KeyFamily, MemoryPreferenceStore, PreferenceKey, PreferenceStore,
        PreferenceValue, SettingsError, get_config_path,
    },
};
