//! Runtime configuration, read from the environment (and a `.env` file, if the binary loads one).

use crate::{DEFAULT_POLL_INTERVAL_SECONDS, MIN_POLL_INTERVAL_SECONDS};
use eyre::{Context, eyre};
use oauth2::{RedirectUrl, RefreshToken};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: RedirectUrl,
    /// Long-lived credential from an earlier authorization, if the operator kept one.
    pub refresh_token: Option<RefreshToken>,
}

impl fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<set>"))
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub application_id: String,
    /// Hex-encoded Ed25519 key used to verify interaction requests.
    pub public_key: String,
    pub channel_id: String,
    /// A message from a previous run to keep editing instead of posting a new one.
    pub message_id: Option<String>,
    pub owner_user_id: String,
}

impl fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("application_id", &self.application_id)
            .field("channel_id", &self.channel_id)
            .field("message_id", &self.message_id)
            .field("owner_user_id", &self.owner_user_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub spotify: SpotifyConfig,
    pub discord: DiscordConfig,
    pub poll_interval: Duration,
    pub listen_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &str| get(name).ok_or_else(|| eyre!("{name} must be set"));

        let redirect_uri = required("SPOTIFY_REDIRECT_URI")?;
        let spotify = SpotifyConfig {
            client_id: required("SPOTIFY_CLIENT_ID")?,
            client_secret: required("SPOTIFY_CLIENT_SECRET")?,
            redirect_uri: RedirectUrl::new(redirect_uri)
                .context("SPOTIFY_REDIRECT_URI is not a valid URL")?,
            refresh_token: get("SPOTIFY_REFRESH_TOKEN").map(RefreshToken::new),
        };

        let discord = DiscordConfig {
            bot_token: required("DISCORD_TOKEN")?,
            application_id: required("DISCORD_APPLICATION_ID")?,
            public_key: required("DISCORD_PUBLIC_KEY")?,
            channel_id: required("DISCORD_CHANNEL_ID")?,
            message_id: get("DISCORD_MESSAGE_ID"),
            owner_user_id: required("OWNER_USER_ID")?,
        };

        let poll_interval = match get("POLL_INTERVAL_SECONDS") {
            Some(seconds) => {
                let seconds: u64 = seconds
                    .trim()
                    .parse()
                    .with_context(|| format!("POLL_INTERVAL_SECONDS={seconds} is not a number"))?;
                if seconds < MIN_POLL_INTERVAL_SECONDS {
                    eyre::bail!(
                        "POLL_INTERVAL_SECONDS must be at least {MIN_POLL_INTERVAL_SECONDS}"
                    );
                }
                seconds
            }
            None => DEFAULT_POLL_INTERVAL_SECONDS,
        };

        let listen_addr: SocketAddr = match (get("LISTEN_ADDR"), get("PORT")) {
            (Some(addr), _) => addr
                .parse()
                .with_context(|| format!("LISTEN_ADDR={addr} is not a socket address"))?,
            (None, Some(port)) => format!("0.0.0.0:{}", port.trim())
                .parse()
                .with_context(|| format!("PORT={port} is not a port number"))?,
            (None, None) => DEFAULT_LISTEN_ADDR
                .parse()
                .context("default listen address")?,
        };

        Ok(Self {
            spotify,
            discord,
            poll_interval: Duration::from_secs(poll_interval),
            listen_addr,
        })
    }
}
