//! The chat side of the bot.
//!
//! The rest of the crate only sees [`ChatSurface`]: send, edit, and look up one message in the
//! target channel, plus answer an interaction. [`client::DiscordClient`] implements it over the
//! Discord REST API; [`interactions`] handles the inbound webhook payloads.

pub mod client;
pub mod interactions;

pub use client::DiscordClient;

use crate::card::NowPlayingCard;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Identifier of a message in the target channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The message we were tracking is gone (deleted by someone, or never existed).
    #[error("the now-playing message no longer exists")]
    OutputTargetMissing,
    #[error("Discord is rate limiting the bot")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Discord rejected the request with {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("could not reach Discord")]
    Transport(#[from] reqwest::Error),
}

/// What the bot needs from a chat platform.
pub trait ChatSurface: Send + Sync {
    /// Posts a new message in the target channel.
    fn send_message(
        &self,
        card: &NowPlayingCard,
    ) -> impl Future<Output = Result<MessageId, ReconcileError>> + Send;

    /// Replaces the body of an existing message.
    ///
    /// Fails with [`ReconcileError::OutputTargetMissing`] if the message is gone.
    fn edit_message(
        &self,
        id: &MessageId,
        card: &NowPlayingCard,
    ) -> impl Future<Output = Result<(), ReconcileError>> + Send;

    /// Checks that a message still exists.
    fn fetch_message(&self, id: &MessageId)
    -> impl Future<Output = Result<(), ReconcileError>> + Send;

    /// Fills in the answer to a command invocation that was acknowledged earlier.
    fn reply_to_interaction(
        &self,
        interaction_token: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), ReconcileError>> + Send;
}
