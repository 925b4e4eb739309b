//! Discord REST API client.

use crate::card::NowPlayingCard;
use crate::discord::{ChatSurface, MessageId, ReconcileError};
use crate::gateway::Command;
use eyre::Context;
use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::instrument;

pub const API_BASE: &str = "https://discord.com/api/v10";

/// Ephemeral flag: only the invoking user sees the message.
const EPHEMERAL: u64 = 1 << 6;

/// Client for the handful of Discord endpoints the bot uses.
///
/// Bound to one application and one target channel; every message operation refers to that
/// channel.
#[derive(Clone)]
pub struct DiscordClient {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    application_id: String,
    channel_id: String,
}

// Manual Debug implementation so the bot token never ends up in logs
impl fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_base", &self.api_base)
            .field("application_id", &self.application_id)
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

/// Body of a 429 response, see <https://discord.com/developers/docs/topics/rate-limits>.
#[derive(Debug, Deserialize)]
struct RateLimitBody {
    /// Seconds, with millisecond precision.
    retry_after: f64,
}

#[derive(Debug, Serialize)]
struct CommandRegistration<'a> {
    name: &'a str,
    description: &'a str,
    /// 1 = CHAT_INPUT (slash command)
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Debug, Serialize)]
struct InteractionEdit<'a> {
    content: &'a str,
    flags: u64,
}

impl DiscordClient {
    pub fn new(
        client: reqwest::Client,
        bot_token: impl Into<String>,
        application_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self::with_api_base(client, API_BASE, bot_token, application_id, channel_id)
    }

    pub fn with_api_base(
        client: reqwest::Client,
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        application_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            bot_token: bot_token.into(),
            application_id: application_id.into(),
            channel_id: channel_id.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bot {}", self.bot_token))
    }

    /// Maps Discord's status codes onto [`ReconcileError`].
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ReconcileError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReconcileError::OutputTargetMissing);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let header = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<f64>().ok());
            let body = response
                .json::<RateLimitBody>()
                .await
                .ok()
                .map(|body| body.retry_after);
            let retry_after = body
                .or(header)
                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());
            tracing::warn!(?retry_after, "rate limited by Discord");
            return Err(ReconcileError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ReconcileError::Rejected { status, body });
        }
        Ok(response)
    }

    /// Replaces the application's global slash commands with the bot's command set.
    ///
    /// # API Reference
    ///
    /// <https://discord.com/developers/docs/interactions/application-commands#bulk-overwrite-global-application-commands>
    #[instrument(skip(self), err)]
    pub async fn register_commands(&self) -> eyre::Result<()> {
        let commands: Vec<_> = Command::REGISTERED
            .iter()
            .map(|&(name, command)| CommandRegistration {
                name,
                description: command.description(),
                kind: 1,
            })
            .collect();

        let path = format!("/applications/{}/commands", self.application_id);
        let response = self
            .request(Method::PUT, &path)
            .json(&commands)
            .send()
            .await
            .context("send command registration to Discord")?;
        Self::check(response)
            .await
            .context("register slash commands")?;

        tracing::info!(count = commands.len(), "registered slash commands");
        Ok(())
    }
}

impl ChatSurface for DiscordClient {
    #[instrument(skip_all, err)]
    async fn send_message(&self, card: &NowPlayingCard) -> Result<MessageId, ReconcileError> {
        let path = format!("/channels/{}/messages", self.channel_id);
        let response = self.request(Method::POST, &path).json(card).send().await?;
        let created: CreatedMessage = Self::check(response).await?.json().await?;

        tracing::debug!(message_id = %created.id, "created now-playing message");
        Ok(MessageId(created.id))
    }

    #[instrument(skip(self, card), fields(message_id = %id))]
    async fn edit_message(
        &self,
        id: &MessageId,
        card: &NowPlayingCard,
    ) -> Result<(), ReconcileError> {
        let path = format!("/channels/{}/messages/{}", self.channel_id, id);
        let response = self.request(Method::PATCH, &path).json(card).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(message_id = %id))]
    async fn fetch_message(&self, id: &MessageId) -> Result<(), ReconcileError> {
        let path = format!("/channels/{}/messages/{}", self.channel_id, id);
        let response = self.request(Method::GET, &path).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// # API Reference
    ///
    /// <https://discord.com/developers/docs/interactions/receiving-and-responding#edit-original-interaction-response>
    #[instrument(skip_all, err)]
    async fn reply_to_interaction(
        &self,
        interaction_token: &str,
        content: &str,
    ) -> Result<(), ReconcileError> {
        let path = format!(
            "/webhooks/{}/{}/messages/@original",
            self.application_id, interaction_token
        );
        let response = self
            .request(Method::PATCH, &path)
            .json(&InteractionEdit {
                content,
                flags: EPHEMERAL,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
