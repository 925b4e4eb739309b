//! Spotify Web API client library.
//!
//! Only the slice of the API the bot needs is covered: the `currently-playing` endpoint of the
//! player API, which reports the item loaded on the user's active device together with the
//! playback position.
//!
//! # Status codes
//!
//! The endpoint distinguishes "nothing playing" from errors by status code rather than body:
//!
//! - `204 No Content`: no active device or nothing loaded
//! - `200 OK`: a JSON [`types::CurrentlyPlaying`] object (whose `item` may still be `null`, for
//!   example while an ad plays or in a private session)
//! - `401 Unauthorized`: the access token expired or was revoked
//! - `429 Too Many Requests`: rate limited, with a `Retry-After` header in seconds

pub mod client;
pub mod types;

pub use client::{CURRENTLY_PLAYING_URL, FetchError, PlaybackSource, SpotifyClient};
pub use types::CurrentlyPlaying;
