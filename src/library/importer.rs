//! Track import.
//!
//! An importer returns the complete current set of playable tracks, optionally
//! restricted to one folder. Imports are idempotent and never modify the
//! files they read.

use std::{
    fs::{metadata, read_dir},
    path::{Path, PathBuf},
    time::{Duration, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    lofty::{prelude::TaggedFileExt, probe::Probe, tag::Accessor},
    tokio::{task::spawn_blocking, time::sleep},
    tracing::{debug, warn},
    xxhash_rust::xxh64::xxh64,
};

use crate::{
    error::{domain::LibraryError, operational::ErrorReporter},
    library::models::{Track, TrackId, UNKNOWN_ARTIST, UNKNOWN_TITLE},
};

/// Audio file extensions picked up by the folder importer.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &[
    "flac", "mp3", "aac", "m4a", "opus", "ogg", "wav", "aiff", "aif",
];

/// Artwork file names checked in each album folder, in order of preference.
const ARTWORK_NAMES: &[&str] = &[
    "folder.jpg",
    "folder.jpeg",
    "cover.jpg",
    "cover.jpeg",
    "album.jpg",
    "front.jpg",
    "folder.png",
    "cover.png",
    "front.png",
];

/// Source of the raw track list.
#[async_trait]
pub trait TrackImporter: Send + Sync {
    /// Fetches every playable track, optionally restricted to `folder`.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the source cannot be read at all.
    async fn fetch(&self, folder: Option<&Path>) -> Result<Vec<Track>, LibraryError>;
}

/// Importer serving a fixed track list.
///
/// A folder restriction keeps tracks whose locator contains the folder path.
#[derive(Debug, Clone, Default)]
pub struct StaticImporter {
    /// Tracks returned by every fetch.
    tracks: Vec<Track>,
    /// Simulated import latency.
    delay: Duration,
}

impl StaticImporter {
    /// Creates an importer returning `tracks`.
    #[must_use]
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            delay: Duration::ZERO,
        }
    }

    /// Delays every fetch.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TrackImporter for StaticImporter {
    async fn fetch(&self, folder: Option<&Path>) -> Result<Vec<Track>, LibraryError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let Some(folder) = folder else {
            return Ok(self.tracks.clone());
        };
        let folder = folder.to_string_lossy();
        Ok(self
            .tracks
            .iter()
            .filter(|track| track.uri.contains(folder.as_ref()))
            .cloned()
            .collect())
    }
}

/// Importer walking a music folder on disk.
#[derive(Debug, Clone)]
pub struct FolderImporter {
    /// Folder scanned when no restriction is given.
    library_root: PathBuf,
}

impl FolderImporter {
    /// Creates an importer rooted at `library_root`.
    #[must_use]
    pub fn new(library_root: PathBuf) -> Self {
        Self { library_root }
    }

    /// Folder scanned when no restriction is given.
    #[must_use]
    pub fn library_root(&self) -> &Path {
        &self.library_root
    }
}

#[async_trait]
impl TrackImporter for FolderImporter {
    async fn fetch(&self, folder: Option<&Path>) -> Result<Vec<Track>, LibraryError> {
        let root = folder.map_or_else(|| self.library_root.clone(), Path::to_path_buf);
        spawn_blocking(move || import_folder(&root))
            .await
            .map_err(|e| LibraryError::InvalidData {
                reason: format!("import task failed: {e}"),
            })?
    }
}

/// Scans `root` recursively and builds a track for every supported file.
///
/// Files are visited in path order so repeated imports return the same
/// sequence.
///
/// # Errors
///
/// Returns `LibraryError::IoError` if `root` cannot be read.
pub fn import_folder(root: &Path) -> Result<Vec<Track>, LibraryError> {
    let mut files = Vec::new();
    collect_audio_files(root, &mut files)?;
    files.sort();
    debug!("FolderImporter: Found {} audio files under {:?}", files.len(), root);

    Ok(files.iter().map(|path| read_track(path)).collect())
}

/// Recursively collects supported audio files.
///
/// Unreadable subdirectories are skipped; only the top-level folder must be
/// readable.
fn collect_audio_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), LibraryError> {
    for entry in read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Err(e) = collect_audio_files(&path, files) {
                warn!("Skipping unreadable folder {:?}: {}", path, e);
            }
        } else if is_supported_audio_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Whether the file extension is one the importer picks up.
#[must_use]
pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| supported.eq_ignore_ascii_case(extension))
        })
}

/// Stable identifier derived from a path.
#[must_use]
pub fn stable_id(path: &Path) -> TrackId {
    xxh64(path.to_string_lossy().as_bytes(), 0).cast_signed()
}

/// Builds a track from one file, falling back to defaults for any tag that
/// cannot be read.
fn read_track(path: &Path) -> Track {
    let (title, artist) = match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(tagged_file) => {
            let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
            (
                tag.and_then(|tag| tag.title().map(|title| title.to_string())),
                tag.and_then(|tag| tag.artist().map(|artist| artist.to_string())),
            )
        }
        Err(e) => {
            ErrorReporter::debug(
                &LibraryError::from(e).into(),
                &format!("Reading tags of {}", path.display()),
            );
            (None, None)
        }
    };

    let title = title
        .filter(|title| !title.trim().is_empty())
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let artist = artist
        .filter(|artist| !artist.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

    let album_dir = path.parent().unwrap_or(path);
    let album_art = find_artwork(album_dir).unwrap_or_else(|| path.to_path_buf());

    Track {
        id: stable_id(path),
        title,
        artist,
        uri: path.to_string_lossy().into_owned(),
        album_id: stable_id(album_dir),
        album_art_uri: album_art.to_string_lossy().into_owned(),
        date_added: modified_seconds(path),
    }
}

/// Finds a cover image next to the audio files.
fn find_artwork(dir: &Path) -> Option<PathBuf> {
    let entries = read_dir(dir).ok()?;
    let mut images: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| {
                        ARTWORK_NAMES
                            .iter()
                            .any(|artwork| artwork.eq_ignore_ascii_case(name))
                    })
        })
        .collect();
    images.sort_by_key(|path| {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        ARTWORK_NAMES
            .iter()
            .position(|artwork| *artwork == name)
            .unwrap_or(usize::MAX)
    });
    images.into_iter().next()
}

/// Modification time in seconds since the epoch, or 0 when unavailable.
fn modified_seconds(path: &Path) -> i64 {
    metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .and_then(|age| i64::try_from(age.as_secs()).ok())
        .unwrap_or(0)
}
