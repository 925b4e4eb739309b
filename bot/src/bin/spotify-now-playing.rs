use eyre::Context;
use spotify_now_playing::config::Config;
use spotify_now_playing::discord::interactions::parse_public_key;
use spotify_now_playing::discord::{DiscordClient, MessageId};
use spotify_now_playing::gateway::CommandGateway;
use spotify_now_playing::oauth::OAuthManager;
use spotify_now_playing::reconcile::ReconciliationLoop;
use spotify_now_playing::server::{self, AppState};
use spotify_now_playing::spotify_api::SpotifyClient;
use spotify_now_playing::token_store::TokenStore;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const OAUTH_DONE: &str = include_str!("../../oauth_success.html");

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("read .env file"),
    }

    let config = Config::from_env().context("load configuration")?;
    tracing::debug!(?config, "configuration loaded");
    let public_key =
        parse_public_key(&config.discord.public_key).context("parse DISCORD_PUBLIC_KEY")?;

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build HTTP client")?;

    let oauth = Arc::new(OAuthManager::new(
        config.spotify.client_id.clone(),
        config.spotify.client_secret.clone(),
    ));
    if config.spotify.refresh_token.is_none() {
        tracing::warn!("no SPOTIFY_REFRESH_TOKEN configured; use /getrefreshtoken to authorize");
    }
    let tokens = Arc::new(TokenStore::new(config.spotify.refresh_token.clone()));

    let discord = DiscordClient::new(
        http.clone(),
        config.discord.bot_token.clone(),
        config.discord.application_id.clone(),
        config.discord.channel_id.clone(),
    );
    if let Err(e) = discord.register_commands().await {
        // Commands registered by an earlier run keep working.
        tracing::warn!(error = ?e, "could not register slash commands");
    }

    let reconciler = Arc::new(ReconciliationLoop::new(
        Arc::clone(&tokens),
        Arc::clone(&oauth),
        SpotifyClient::new(http),
        discord.clone(),
        config.poll_interval,
    ));
    if let Some(message_id) = config.discord.message_id.clone() {
        if let Err(e) = reconciler.adopt(MessageId(message_id)).await {
            tracing::warn!(error = %e, "could not check DISCORD_MESSAGE_ID; a new message will be posted");
        }
    }

    let gateway = Arc::new(CommandGateway::new(
        config.discord.owner_user_id.clone(),
        oauth,
        tokens,
        Arc::clone(&reconciler),
        config.spotify.redirect_uri.clone(),
    ));
    let state = Arc::new(AppState {
        gateway,
        chat: discord,
        public_key,
        success_page: OAUTH_DONE,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("bind to {}", config.listen_addr))?;

    tokio::select! {
        () = reconciler.run_forever() => eyre::bail!("polling loop exited"),
        result = server::serve(listener, state) => result.context("HTTP server"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("wait for ctrl-c")?;
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
