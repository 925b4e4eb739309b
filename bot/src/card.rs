//! Turns a [`PlaybackSnapshot`] into the message body shown on Discord.

use crate::snapshot::PlaybackSnapshot;
use jiff::Timestamp;
use serde::Serialize;

/// Spotify brand green.
const ACTIVE_COLOR: u32 = 0x1DB954;
const IDLE_COLOR: u32 = 0x535353;

/// A complete message body: plain content plus one embed.
///
/// `content` is always sent (possibly empty) so that edits clear anything left over from a
/// previous body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlayingCard {
    pub content: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
    /// Shown by Discord as the embed's own "last updated" time.
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

impl NowPlayingCard {
    /// Renders `snapshot` as observed at `now`.
    pub fn render(snapshot: &PlaybackSnapshot, now: Timestamp) -> Self {
        let embed = match snapshot {
            PlaybackSnapshot::Empty => Embed {
                title: "Nothing playing".to_string(),
                url: None,
                description: "Spotify is idle right now.".to_string(),
                color: IDLE_COLOR,
                thumbnail: None,
                fields: Vec::new(),
                footer: footer(),
                timestamp: now,
            },
            PlaybackSnapshot::Active(track) => Embed {
                title: track.track_title.clone(),
                url: track.track_url.clone(),
                description: track.artists_label(),
                color: ACTIVE_COLOR,
                thumbnail: track
                    .artwork_url
                    .clone()
                    .map(|url| EmbedImage { url }),
                fields: [
                    Some(EmbedField {
                        name: "Progress".to_string(),
                        value: track.progress_label(),
                        inline: false,
                    }),
                    track.started_at(now).map(|at| EmbedField {
                        name: "Started".to_string(),
                        value: discord_time(at, 't'),
                        inline: true,
                    }),
                    track.ends_at(now).map(|at| EmbedField {
                        name: "Ends".to_string(),
                        value: discord_time(at, 'R'),
                        inline: true,
                    }),
                ]
                .into_iter()
                .flatten()
                .collect(),
                footer: footer(),
                timestamp: now,
            },
        };

        Self {
            content: String::new(),
            embeds: vec![embed],
        }
    }
}

fn footer() -> EmbedFooter {
    EmbedFooter {
        text: "Spotify".to_string(),
    }
}

/// Discord renders `<t:unix:style>` in each viewer's own timezone.
fn discord_time(at: Timestamp, style: char) -> String {
    format!("<t:{}:{style}>", at.as_second())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn now() -> Timestamp {
        Timestamp::from_second(1_700_000_000).unwrap()
    }

    #[test]
    fn active_card_shows_title_artists_and_progress() {
        let snapshot =
            PlaybackSnapshot::active("Song A", vec!["Artist X".into()], None, 30_000, 200_000);
        let card = NowPlayingCard::render(&snapshot, now());
        let embed = &card.embeds[0];

        assert_eq!(embed.title, "Song A");
        assert_eq!(embed.description, "Artist X");
        assert_eq!(embed.fields[0].value, "0:30 / 3:20");
        assert_eq!(embed.fields[1].value, "<t:1699999970:t>");
        assert_eq!(embed.fields[2].value, "<t:1700000170:R>");
        assert_eq!(embed.thumbnail, None);

        let json = serde_json::to_string(&card).unwrap();
        for needle in ["Song A", "Artist X", "0:30 / 3:20"] {
            assert!(json.contains(needle), "{needle} missing from {json}");
        }
    }

    #[test]
    fn out_of_range_times_are_left_off() {
        let payload = serde_json::json!({
            "is_playing": true,
            "progress_ms": 0,
            "item": {
                "name": "Endless",
                "duration_ms": u64::MAX,
                "artists": [{ "name": "Drone" }]
            }
        });
        let playing: crate::spotify_api::CurrentlyPlaying = serde_json::from_value(payload).unwrap();
        let card = NowPlayingCard::render(&playing.into_snapshot(), now());

        let names: Vec<_> = card.embeds[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Progress", "Started"]);
        assert_eq!(card.embeds[0].fields[1].value, "<t:1700000000:t>");

        let snapshot = PlaybackSnapshot::active("Long", vec![], None, 0, 1_000_000_000_000_000);
        let card = NowPlayingCard::render(&snapshot, now());
        let names: Vec<_> = card.embeds[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Progress", "Started"]);
    }

    #[test]
    fn artwork_becomes_thumbnail() {
        let snapshot = PlaybackSnapshot::active(
            "Song A",
            vec![],
            Some("https://i.scdn.co/image/a".into()),
            0,
            1_000,
        );
        let card = NowPlayingCard::render(&snapshot, now());
        assert_eq!(
            card.embeds[0].thumbnail,
            Some(EmbedImage {
                url: "https://i.scdn.co/image/a".into()
            })
        );
        assert_eq!(card.embeds[0].description, "Unknown artist");
    }

    #[test]
    fn empty_card_serializes_without_optional_parts() {
        let card = NowPlayingCard::render(&PlaybackSnapshot::Empty, now());
        let json = serde_json::to_value(&card).unwrap();

        assert_eq!(json["content"], "");
        assert_eq!(json["embeds"][0]["title"], "Nothing playing");
        assert!(json["embeds"][0].get("fields").is_none());
        assert!(json["embeds"][0].get("thumbnail").is_none());
        assert_eq!(json["embeds"][0]["timestamp"], "2023-11-14T22:13:20Z");
    }
}
