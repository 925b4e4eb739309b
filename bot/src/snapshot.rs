//! Point-in-time playback state as the rest of the bot sees it.

use jiff::{SignedDuration, Timestamp};

/// What the Spotify account is playing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSnapshot {
    /// Nothing is playing.
    Empty,
    /// A track or episode is loaded.
    Active(ActiveTrack),
}

impl PlaybackSnapshot {
    /// Builds an active snapshot, keeping progress within the track.
    ///
    /// A zero-length item has nothing meaningful to show and becomes [`PlaybackSnapshot::Empty`].
    pub fn active(
        track_title: impl Into<String>,
        artist_names: Vec<String>,
        artwork_url: Option<String>,
        progress_ms: u64,
        duration_ms: u64,
    ) -> Self {
        if duration_ms == 0 {
            return Self::Empty;
        }
        Self::Active(ActiveTrack {
            track_title: track_title.into(),
            artist_names,
            artwork_url,
            track_url: None,
            progress_ms: progress_ms.min(duration_ms),
            duration_ms,
        })
    }

    /// Attaches a link to the item on Spotify, if the snapshot is active.
    pub fn with_track_url(mut self, url: Option<String>) -> Self {
        if let Self::Active(track) = &mut self {
            track.track_url = url;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTrack {
    pub track_title: String,
    pub artist_names: Vec<String>,
    pub artwork_url: Option<String>,
    pub track_url: Option<String>,
    progress_ms: u64,
    duration_ms: u64,
}

impl ActiveTrack {
    pub fn progress_ms(&self) -> u64 {
        self.progress_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Wall-clock time the item started, assuming uninterrupted playback up to `now`.
    ///
    /// `None` if that lies outside the representable range.
    pub fn started_at(&self, now: Timestamp) -> Option<Timestamp> {
        now.checked_sub(millis(self.progress_ms)?).ok()
    }

    /// Wall-clock time the item will end if playback continues from `now`.
    ///
    /// `None` if that lies outside the representable range.
    pub fn ends_at(&self, now: Timestamp) -> Option<Timestamp> {
        now.checked_add(millis(self.duration_ms - self.progress_ms)?).ok()
    }

    /// `"0:30 / 3:20"`
    pub fn progress_label(&self) -> String {
        format!(
            "{} / {}",
            format_clock(self.progress_ms),
            format_clock(self.duration_ms)
        )
    }

    pub fn artists_label(&self) -> String {
        if self.artist_names.is_empty() {
            "Unknown artist".to_string()
        } else {
            self.artist_names.join(", ")
        }
    }
}

fn millis(ms: u64) -> Option<SignedDuration> {
    i64::try_from(ms).ok().map(SignedDuration::from_millis)
}

/// Formats milliseconds as `m:ss`, or `h:mm:ss` once past the hour.
pub fn format_clock(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let (hours, minutes, seconds) = (
        total_seconds / 3600,
        (total_seconds / 60) % 60,
        total_seconds % 60,
    );
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
