use eyre::Context;
use jiff::Timestamp;
use oauth2::RefreshToken;
use spotify_now_playing::card::NowPlayingCard;
use spotify_now_playing::oauth::{OAuthManager, TokenExchanger};
use spotify_now_playing::snapshot::PlaybackSnapshot;
use spotify_now_playing::spotify_api::{PlaybackSource, SpotifyClient};
use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn var(name: &str) -> eyre::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let oauth = OAuthManager::new(var("SPOTIFY_CLIENT_ID")?, var("SPOTIFY_CLIENT_SECRET")?);
    let refresh_token = RefreshToken::new(var("SPOTIFY_REFRESH_TOKEN")?);

    let credentials = oauth
        .refresh_access_token(&refresh_token)
        .await
        .context("refresh Spotify access token")?;
    if credentials.refresh_token.is_some() {
        eprintln!("note: Spotify issued a new refresh token; re-authorize the bot if the old one stops working");
    }

    let spotify = SpotifyClient::new(reqwest::Client::new());
    let snapshot = spotify
        .fetch_current_playback(&credentials.access_token)
        .await
        .context("fetch playback state")?;

    match &snapshot {
        PlaybackSnapshot::Empty => eprintln!("==> nothing playing"),
        PlaybackSnapshot::Active(track) => eprintln!(
            "==> {} by {} ({})",
            track.track_title,
            track.artists_label(),
            track.progress_label()
        ),
    }

    let card = NowPlayingCard::render(&snapshot, Timestamp::now());
    println!(
        "{}",
        serde_json::to_string_pretty(&card).context("serialize message body")?
    );

    Ok(())
}
