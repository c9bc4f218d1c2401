//! Music library views.
//!
//! This module provides the track data model, the importers that produce
//! the raw track list, and the projection engine that derives the visible
//! list, daily mix and listening stats from it.

pub mod importer;
pub mod models;
pub mod projection;

pub use {
    importer::{FolderImporter, StaticImporter, TrackImporter},
    models::{LibraryStats, SortOrder, Track, TrackId, TrackOverride},
    projection::{DAILY_MIX_SIZE, LibraryProjection},
};
