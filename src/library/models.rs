//! Data models for the music library.
//!
//! This module defines the core value types shared by the projection engine,
//! the importer and the playback session: tracks, user overrides, sort order
//! and the aggregate statistics view.

use std::{collections::BTreeMap, fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Stable numeric identifier assigned by the importer.
pub type TrackId = i64;

/// Sentinel shown as the top artist when nothing has been played.
pub const NO_TOP_ARTIST: &str = "N/A";

/// Fallback title for files without a title tag.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Fallback artist for files without an artist tag.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Represents a playable track in the library.
///
/// Tracks are immutable values. A user edit never mutates a track in place;
/// it produces a new value with the same `id` (see [`Track::with_override`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Track {
    /// Stable identifier.
    pub id: TrackId,
    /// Track title.
    pub title: String,
    /// Track artist.
    pub artist: String,
    /// Opaque locator the playback engine streams from.
    pub uri: String,
    /// Album identifier (0 when unknown).
    pub album_id: i64,
    /// Locator of the album artwork.
    ///
    /// Folder imports point at a cover image next to the track, or at the
    /// audio file itself when there is none so an extractor can fall back to
    /// embedded pictures.
    pub album_art_uri: String,
    /// Import timestamp in seconds since the Unix epoch.
    pub date_added: i64,
}

impl Track {
    /// Returns a copy of this track with the override's title and artist.
    #[must_use]
    pub fn with_override(&self, track_override: &TrackOverride) -> Self {
        Self {
            title: track_override.title.clone(),
            artist: track_override.artist.clone(),
            ..self.clone()
        }
    }
}

/// User-supplied title and artist for one track, keyed by track id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackOverride {
    /// Replacement title.
    pub title: String,
    /// Replacement artist.
    pub artist: String,
}

/// Ordering applied to the library before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Case-insensitive by title (default).
    #[default]
    Title,
    /// Case-insensitive by artist.
    Artist,
    /// Newest imports first.
    Recent,
}

/// Error returned when parsing an unknown sort order name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown sort order: {0}")]
pub struct ParseSortOrderError(pub String);

impl SortOrder {
    /// Stable name used for persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "TITLE",
            Self::Artist => "ARTIST",
            Self::Recent => "RECENT",
        }
    }

    /// Human-readable label for sort pickers.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Title => "Title (A-Z)",
            Self::Artist => "Artist (A-Z)",
            Self::Recent => "Recently Added",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = ParseSortOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TITLE" => Ok(Self::Title),
            "ARTIST" => Ok(Self::Artist),
            "RECENT" => Ok(Self::Recent),
            other => Err(ParseSortOrderError(other.to_string())),
        }
    }
}

/// Summary statistics over the whole library.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LibraryStats {
    /// Sum of play counts over all tracks.
    pub total_plays: u64,
    /// Artist whose tracks have the highest summed play count.
    pub top_artist: Option<String>,
}

impl LibraryStats {
    /// Flattens the statistics into the fixed `total`/`artist` mapping the
    /// presentation layer renders.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("total", self.total_plays.to_string()),
            (
                "artist",
                self.top_artist
                    .clone()
                    .unwrap_or_else(|| NO_TOP_ARTIST.to_string()),
            ),
        ])
    }
}
