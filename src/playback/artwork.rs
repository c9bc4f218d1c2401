//! Accent color derivation from album artwork.
//!
//! Image analysis is delegated to an [`ArtworkColorExtractor`]; the session
//! only stores the resulting color, falling back to [`AccentColor::DEFAULT`]
//! when the artwork is missing or yields no color.

use std::{collections::HashMap, fmt};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

/// ARGB color used to tint the player UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccentColor(pub u32);

impl AccentColor {
    /// Electric blue used when no artwork color is available.
    pub const DEFAULT: Self = Self(0xFF29_79FF);

    /// Packed ARGB value.
    #[must_use]
    pub fn argb(self) -> u32 {
        self.0
    }

    /// Red, green and blue components.
    #[must_use]
    pub fn rgb(self) -> (u8, u8, u8) {
        let [_, r, g, b] = self.0.to_be_bytes();
        (r, g, b)
    }
}

impl Default for AccentColor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AccentColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08X}", self.0)
    }
}

/// Yields a representative color for a piece of album art.
#[async_trait]
pub trait ArtworkColorExtractor: Send + Sync {
    /// Extracts a color from the artwork at `album_art_uri`, or `None` when
    /// the artwork is missing or undecodable.
    async fn extract(&self, album_art_uri: &str) -> Option<AccentColor>;
}

/// Extractor for environments without image analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArtworkColors;

#[async_trait]
impl ArtworkColorExtractor for NoArtworkColors {
    async fn extract(&self, _album_art_uri: &str) -> Option<AccentColor> {
        None
    }
}

/// Extractor answering from a precomputed palette keyed by artwork locator.
#[derive(Debug, Clone, Default)]
pub struct PaletteLookup {
    /// Known colors keyed by artwork locator.
    colors: HashMap<String, AccentColor>,
}

impl PaletteLookup {
    /// Creates a lookup from `(locator, color)` pairs.
    #[must_use]
    pub fn new(colors: impl IntoIterator<Item = (String, AccentColor)>) -> Self {
        Self {
            colors: colors.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ArtworkColorExtractor for PaletteLookup {
    async fn extract(&self, album_art_uri: &str) -> Option<AccentColor> {
        self.colors.get(album_art_uri).copied()
    }
}

#[cfg(test)]
mod tests {
    use crate::playback::artwork::{
        AccentColor, ArtworkColorExtractor, NoArtworkColors, PaletteLookup,
    };

    #[test]
    fn test_default_accent() {
        assert_eq!(AccentColor::default().argb(), 0xFF29_79FF);
        assert_eq!(AccentColor::DEFAULT.rgb(), (0x29, 0x79, 0xFF));
        assert_eq!(AccentColor::DEFAULT.to_string(), "#FF2979FF");
    }

    #[tokio::test]
    async fn test_extractors() {
        assert_eq!(NoArtworkColors.extract("file:///cover.jpg").await, None);

        let lookup = PaletteLookup::new([("file:///cover.jpg".to_string(), AccentColor(0xFF00_FF00))]);
        assert_eq!(lookup.extract("file:///cover.jpg").await, Some(AccentColor(0xFF00_FF00)));
        assert_eq!(lookup.extract("file:///other.jpg").await, None);
    }
}
