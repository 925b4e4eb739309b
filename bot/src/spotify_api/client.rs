//! Fetching what the account is playing.

use crate::snapshot::PlaybackSnapshot;
use crate::spotify_api::types::CurrentlyPlaying;
use oauth2::AccessToken;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

pub const CURRENTLY_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";

/// Why a playback fetch did not produce a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The access token expired or was revoked; refresh and try again.
    #[error("Spotify rejected the access token")]
    Unauthorized,
    #[error("rate limited by Spotify")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Spotify returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("could not reach Spotify")]
    Transport(#[from] reqwest::Error),
}

/// Anything that can report what is currently playing.
///
/// One call is one upstream request; implementations do not retry.
pub trait PlaybackSource: Send + Sync {
    fn fetch_current_playback(
        &self,
        access_token: &AccessToken,
    ) -> impl Future<Output = Result<PlaybackSnapshot, FetchError>> + Send;
}

/// Client for the Spotify player API.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SpotifyClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoint(client, CURRENTLY_PLAYING_URL)
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl PlaybackSource for SpotifyClient {
    /// Asks Spotify what the user is playing right now.
    ///
    /// # API Reference
    ///
    /// <https://developer.spotify.com/documentation/web-api/reference/get-the-users-currently-playing-track>
    #[instrument(skip_all, level = tracing::Level::DEBUG, err(Display))]
    async fn fetch_current_playback(
        &self,
        access_token: &AccessToken,
    ) -> Result<PlaybackSnapshot, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("additional_types", "track,episode")])
            .bearer_auth(access_token.secret())
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::NO_CONTENT => {
                tracing::trace!("nothing playing");
                Ok(PlaybackSnapshot::Empty)
            }
            StatusCode::UNAUTHORIZED => Err(FetchError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(FetchError::RateLimited { retry_after })
            }
            status if status.is_success() => {
                let body = response.text().await?;
                if body.trim().is_empty() {
                    return Ok(PlaybackSnapshot::Empty);
                }
                let playing: CurrentlyPlaying =
                    serde_json::from_str(&body).map_err(|e| FetchError::Upstream {
                        status,
                        body: format!("unparseable playback payload ({e}): {body}"),
                    })?;
                tracing::trace!(
                    is_playing = playing.is_playing,
                    kind = ?playing.currently_playing_type,
                    "fetched playback state"
                );
                Ok(playing.into_snapshot())
            }
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                Err(FetchError::Upstream { status, body })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, RecordedRequest, json_response, text_response};
    use http::StatusCode as HttpStatus;
    use pretty_assertions::assert_eq;

    fn token() -> AccessToken {
        AccessToken::new("access-1".to_string())
    }

    async fn client_for(handler: test_support::Handler) -> SpotifyClient {
        let addr = test_support::serve(handler).await;
        SpotifyClient::with_endpoint(
            reqwest::Client::new(),
            format!("http://{addr}/v1/me/player/currently-playing"),
        )
    }

    #[tokio::test]
    async fn sends_bearer_token_and_parses_active_track() {
        let client = client_for(Box::new(|req: RecordedRequest| {
            assert_eq!(req.header("authorization").as_deref(), Some("Bearer access-1"));
            assert_eq!(
                req.parts.uri.query(),
                Some("additional_types=track%2Cepisode")
            );
            json_response(
                HttpStatus::OK,
                serde_json::json!({
                    "is_playing": true,
                    "progress_ms": 30000,
                    "item": {
                        "name": "Song A",
                        "duration_ms": 200000,
                        "artists": [{ "name": "Artist X" }],
                        "album": { "images": [] }
                    }
                }),
            )
        }))
        .await;

        let snapshot = client.fetch_current_playback(&token()).await.unwrap();
        assert_eq!(
            snapshot,
            PlaybackSnapshot::active("Song A", vec!["Artist X".into()], None, 30000, 200000)
        );
    }

    #[tokio::test]
    async fn no_content_is_nothing_playing() {
        let client = client_for(Box::new(|_: RecordedRequest| text_response(HttpStatus::NO_CONTENT, ""))).await;
        let snapshot = client.fetch_current_playback(&token()).await.unwrap();
        assert_eq!(snapshot, PlaybackSnapshot::Empty);
    }

    #[tokio::test]
    async fn unauthorized_is_classified() {
        let client = client_for(Box::new(|_: RecordedRequest| {
            json_response(
                HttpStatus::UNAUTHORIZED,
                serde_json::json!({ "error": { "status": 401, "message": "The access token expired" } }),
            )
        }))
        .await;
        let result = client.fetch_current_playback(&token()).await;
        assert!(matches!(result, Err(FetchError::Unauthorized)), "{result:?}");
    }

    #[tokio::test]
    async fn rate_limit_reports_retry_after() {
        let client = client_for(Box::new(|_: RecordedRequest| {
            let mut response = text_response(HttpStatus::TOO_MANY_REQUESTS, "");
            response
                .headers_mut()
                .insert("retry-after", http::HeaderValue::from_static("7"));
            response
        }))
        .await;
        let result = client.fetch_current_playback(&token()).await;
        match result {
            Err(FetchError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_statuses_carry_status_and_body() {
        let client = client_for(Box::new(|_: RecordedRequest| {
            text_response(HttpStatus::BAD_GATEWAY, "upstream fell over")
        }))
        .await;
        let result = client.fetch_current_playback(&token()).await;
        match result {
            Err(FetchError::Upstream { status, body }) => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "upstream fell over");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_success_body_is_an_upstream_error() {
        let client = client_for(Box::new(|_: RecordedRequest| text_response(HttpStatus::OK, "<html>"))).await;
        let result = client.fetch_current_playback(&token()).await;
        assert!(
            matches!(&result, Err(FetchError::Upstream { status, .. }) if *status == StatusCode::OK),
            "{result:?}"
        );
    }

    #[tokio::test]
    async fn unreachable_is_a_transport_error() {
        let addr = test_support::unused_addr().await;
        let client = SpotifyClient::with_endpoint(reqwest::Client::new(), format!("http://{addr}/"));
        let result = client.fetch_current_playback(&token()).await;
        assert!(matches!(result, Err(FetchError::Transport(_))), "{result:?}");
    }
}
