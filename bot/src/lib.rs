//! Keeps one Discord message in sync with what a Spotify account is currently playing.
//!
//! The pieces, leaf-first:
//!
//! - [`token_store::TokenStore`] holds the Spotify credentials and serializes refreshes.
//! - [`oauth::OAuthManager`] talks to the Spotify token endpoint.
//! - [`spotify_api::SpotifyClient`] polls the currently-playing endpoint.
//! - [`reconcile::ReconciliationLoop`] polls and keeps the single output message current.
//! - [`gateway::CommandGateway`] answers owner commands coming in from Discord.
//!
//! [`server`] and [`discord`] adapt all of that to HTTP and the Discord API.

pub mod card;
pub mod config;
pub mod discord;
pub mod gateway;
pub mod oauth;
pub mod reconcile;
pub mod server;
pub mod snapshot;
pub mod spotify_api;
pub mod token_store;

#[cfg(test)]
pub(crate) mod test_support;

/// Default delay between the end of one polling cycle and the start of the next.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 10;

/// Lower bound on the polling interval to stay clear of Spotify rate limits.
pub const MIN_POLL_INTERVAL_SECONDS: u64 = 1;
