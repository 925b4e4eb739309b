//! Wire types for the player API.

use crate::snapshot::PlaybackSnapshot;
use serde::Deserialize;

/// Response body of `GET /v1/me/player/currently-playing`.
///
/// See: <https://developer.spotify.com/documentation/web-api/reference/get-the-users-currently-playing-track>
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    /// Progress into the item, in milliseconds. Absent for some device types.
    pub progress_ms: Option<u64>,
    /// The loaded track or episode; `null` during ads and private sessions.
    pub item: Option<PlayingItem>,
    /// `track`, `episode`, `ad`, or `unknown`.
    pub currently_playing_type: Option<String>,
}

/// A track or an episode. Tracks carry `artists` and `album`, episodes carry `show` and `images`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayingItem {
    pub name: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Option<Album>,
    pub show: Option<Show>,
    #[serde(default)]
    pub images: Vec<Image>,
    pub external_urls: Option<ExternalUrls>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    #[serde(default)]
    pub name: String,
    /// Cover art in several sizes, widest first.
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Show {
    pub name: String,
    pub publisher: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

impl CurrentlyPlaying {
    pub fn into_snapshot(self) -> PlaybackSnapshot {
        let Some(item) = self.item else {
            return PlaybackSnapshot::Empty;
        };

        let artist_names = if !item.artists.is_empty() {
            item.artists.into_iter().map(|artist| artist.name).collect()
        } else if let Some(show) = &item.show {
            vec![show.publisher.clone().unwrap_or_else(|| show.name.clone())]
        } else {
            Vec::new()
        };

        let artwork_url = item
            .album
            .and_then(|album| album.images.into_iter().next())
            .or_else(|| item.images.into_iter().next())
            .map(|image| image.url);

        PlaybackSnapshot::active(
            item.name,
            artist_names,
            artwork_url,
            self.progress_ms.unwrap_or(0),
            item.duration_ms,
        )
        .with_track_url(item.external_urls.and_then(|urls| urls.spotify))
    }
}
