//! Library projection engine.
//!
//! Turns the raw imported track list plus persisted overrides, play counts,
//! sort order and search text into the views the presentation layer renders.
//! Every view is a pure function of the current inputs and is recomputed on
//! demand; setters are the only recomputation triggers.

use std::{
    cmp::Reverse,
    collections::{HashMap, hash_map::Entry},
};

use crate::library::models::{LibraryStats, SortOrder, Track, TrackId, TrackOverride};

/// Number of tracks in the daily mix.
pub const DAILY_MIX_SIZE: usize = 6;

/// Inputs of the library views and the projections derived from them.
#[derive(Debug, Clone)]
pub struct LibraryProjection {
    /// Result of the most recent import, in import order.
    raw_tracks: Vec<Track>,
    /// User overrides keyed by track id.
    overrides: HashMap<TrackId, TrackOverride>,
    /// Play counts keyed by track id; missing entries count as zero.
    play_counts: HashMap<TrackId, u32>,
    /// Active sort order.
    sort_order: SortOrder,
    /// Active free-text query (possibly blank).
    search_query: String,
    /// Maximum length of the daily mix.
    daily_mix_size: usize,
}

impl Default for LibraryProjection {
    fn default() -> Self {
        Self::new(DAILY_MIX_SIZE)
    }
}

impl LibraryProjection {
    /// Creates an empty projection.
    ///
    /// # Arguments
    ///
    /// * `daily_mix_size` - Maximum number of tracks in the daily mix.
    #[must_use]
    pub fn new(daily_mix_size: usize) -> Self {
        Self {
            raw_tracks: Vec::new(),
            overrides: HashMap::new(),
            play_counts: HashMap::new(),
            sort_order: SortOrder::default(),
            search_query: String::new(),
            daily_mix_size,
        }
    }

    /// Replaces the raw imported track list.
    pub fn set_raw_tracks(&mut self, tracks: Vec<Track>) {
        self.raw_tracks = tracks;
    }

    /// Adds persisted overrides for tracks that have none in memory.
    ///
    /// Overrides set since the persisted ones were read take precedence.
    pub fn merge_overrides(&mut self, overrides: HashMap<TrackId, TrackOverride>) {
        for (id, track_override) in overrides {
            self.overrides.entry(id).or_insert(track_override);
        }
    }

    /// Creates or replaces the override of one track.
    pub fn set_override(&mut self, id: TrackId, track_override: TrackOverride) {
        self.overrides.insert(id, track_override);
    }

    /// Adds persisted play counts for tracks that have none in memory.
    ///
    /// In-memory counts are never lowered by an older persisted value.
    pub fn merge_play_counts(&mut self, play_counts: HashMap<TrackId, u32>) {
        for (id, count) in play_counts {
            self.play_counts.entry(id).or_insert(count);
        }
    }

    /// Adds one play to a track and returns its new count.
    pub fn increment_play_count(&mut self, id: TrackId) -> u32 {
        match self.play_counts.entry(id) {
            Entry::Occupied(mut entry) => {
                let count = entry.get_mut();
                *count = count.saturating_add(1);
                *count
            }
            Entry::Vacant(entry) => *entry.insert(1),
        }
    }

    /// Zeroes every play count.
    pub fn reset_play_counts(&mut self) {
        self.play_counts.clear();
    }

    /// Sets the active sort order.
    pub fn set_sort_order(&mut self, sort_order: SortOrder) {
        self.sort_order = sort_order;
    }

    /// Sets the active search query.
    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    /// Active sort order.
    #[must_use]
    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    /// Active search query.
    #[must_use]
    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    /// Whether the last import produced any track.
    #[must_use]
    pub fn has_tracks(&self) -> bool {
        !self.raw_tracks.is_empty()
    }

    /// Play count of one track.
    #[must_use]
    pub fn play_count(&self, id: TrackId) -> u32 {
        self.play_counts.get(&id).copied().unwrap_or(0)
    }

    /// Looks up a track by id with its override applied.
    #[must_use]
    pub fn find(&self, id: TrackId) -> Option<Track> {
        self.raw_tracks
            .iter()
            .find(|track| track.id == id)
            .map(|track| self.apply_override(track))
    }

    /// All tracks with overrides applied, in import order.
    #[must_use]
    pub fn library_tracks(&self) -> Vec<Track> {
        self.raw_tracks
            .iter()
            .map(|track| self.apply_override(track))
            .collect()
    }

    /// All tracks with overrides applied, sorted but not filtered.
    ///
    /// This is the ordering loaded into the playback engine.
    #[must_use]
    pub fn ordered_tracks(&self) -> Vec<Track> {
        sort_tracks(self.library_tracks(), self.sort_order)
    }

    /// Tracks the library screen shows: overridden, sorted, then filtered.
    #[must_use]
    pub fn visible_tracks(&self) -> Vec<Track> {
        filter_tracks(self.ordered_tracks(), &self.search_query)
    }

    /// Most-played tracks, independent of the search query.
    #[must_use]
    pub fn daily_mix(&self) -> Vec<Track> {
        let mut tracks = self.library_tracks();
        tracks.sort_by_key(|track| Reverse(self.play_count(track.id)));
        tracks.truncate(self.daily_mix_size);
        tracks
    }

    /// Total plays and the most-played artist.
    ///
    /// Artists are compared by the summed play count of their tracks. On a
    /// tie the artist encountered first in import order wins. With no plays
    /// at all there is no top artist.
    #[must_use]
    pub fn stats(&self) -> LibraryStats {
        let mut per_artist: Vec<(String, u64)> = Vec::new();
        let mut total_plays = 0_u64;

        for track in self.library_tracks() {
            let count = u64::from(self.play_count(track.id));
            total_plays += count;
            match per_artist.iter_mut().find(|(artist, _)| *artist == track.artist) {
                Some((_, sum)) => *sum += count,
                None => per_artist.push((track.artist, count)),
            }
        }

        let top_artist = if total_plays == 0 {
            None
        } else {
            per_artist
                .into_iter()
                .fold(None, |best: Option<(String, u64)>, (artist, sum)| match best {
                    Some((_, best_sum)) if best_sum >= sum => best,
                    _ => Some((artist, sum)),
                })
                .map(|(artist, _)| artist)
        };

        LibraryStats {
            total_plays,
            top_artist,
        }
    }

    fn apply_override(&self, track: &Track) -> Track {
        match self.overrides.get(&track.id) {
            Some(track_override) => track.with_override(track_override),
            None => track.clone(),
        }
    }
}

/// Sorts tracks with a stable sort so ties keep their input order.
#[must_use]
pub fn sort_tracks(mut tracks: Vec<Track>, sort_order: SortOrder) -> Vec<Track> {
    match sort_order {
        SortOrder::Title => tracks.sort_by_cached_key(|track| track.title.to_lowercase()),
        SortOrder::Artist => tracks.sort_by_cached_key(|track| track.artist.to_lowercase()),
        SortOrder::Recent => tracks.sort_by_key(|track| Reverse(track.date_added)),
    }
    tracks
}

/// Keeps tracks whose title or artist contains the query, ignoring case.
///
/// A blank query keeps everything.
#[must_use]
pub fn filter_tracks(tracks: Vec<Track>, query: &str) -> Vec<Track> {
    if query.trim().is_empty() {
        return tracks;
    }

    let needle = query.to_lowercase();
    tracks
        .into_iter()
        .filter(|track| {
            track.title.to_lowercase().contains(&needle)
                || track.artist.to_lowercase().contains(&needle)
        })
        .collect()
}
