//! Owner commands: authorizing Spotify access, checking on the loop, and forcing a cycle.
//!
//! [`CommandGateway::handle_invocation`] knows nothing about Discord; it takes who invoked what
//! and returns the text to show them. The callback half of authorization,
//! [`CommandGateway::complete_authorization`], is driven by the HTTP server.

use crate::discord::ChatSurface;
use crate::oauth::{AuthError, AuthorizationRequest, TokenExchanger};
use crate::reconcile::{ReconciliationLoop, describe_error};
use crate::spotify_api::PlaybackSource;
use crate::token_store::TokenStore;
use oauth2::RedirectUrl;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Send the owner a Spotify consent link.
    Authorize,
    Status,
    /// Run a polling cycle now.
    Refresh,
}

impl Command {
    /// Every command name the bot answers to, in registration order.
    pub const REGISTERED: &'static [(&'static str, Command)] = &[
        ("getrefreshtoken", Command::Authorize),
        ("gettoken", Command::Authorize),
        ("status", Command::Status),
        ("refresh", Command::Refresh),
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::REGISTERED
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|&(_, command)| command)
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::Authorize => "Get a link to authorize Spotify access",
            Command::Status => "Show the state of the now-playing loop",
            Command::Refresh => "Update the now-playing message right away",
        }
    }
}

/// The answer to a command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    /// Only the invoker should see it.
    pub ephemeral: bool,
}

impl Reply {
    fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("the authorization link is stale or was not issued by this bot; request a new one")]
    StateMismatch,
    #[error("the callback carried no authorization state; use a link from /getrefreshtoken")]
    MissingState,
    #[error("could not exchange the authorization code")]
    Auth(#[from] AuthError),
}

pub struct CommandGateway<E, P, C> {
    owner_id: String,
    oauth: Arc<E>,
    tokens: Arc<TokenStore>,
    reconciler: Arc<ReconciliationLoop<E, P, C>>,
    redirect_uri: RedirectUrl,
    /// The most recently issued consent link; a new one supersedes it.
    pending: Mutex<Option<AuthorizationRequest>>,
}

impl<E, P, C> std::fmt::Debug for CommandGateway<E, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("owner_id", &self.owner_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl<E, P, C> CommandGateway<E, P, C>
where
    E: TokenExchanger,
    P: PlaybackSource,
    C: ChatSurface,
{
    pub fn new(
        owner_id: impl Into<String>,
        oauth: Arc<E>,
        tokens: Arc<TokenStore>,
        reconciler: Arc<ReconciliationLoop<E, P, C>>,
        redirect_uri: RedirectUrl,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            oauth,
            tokens,
            reconciler,
            redirect_uri,
            pending: Mutex::new(None),
        }
    }

    /// Answers `command_name` invoked by `principal_id`.
    ///
    /// Anyone but the owner is turned away before anything else happens.
    #[tracing::instrument(skip(self))]
    pub async fn handle_invocation(&self, principal_id: &str, command_name: &str) -> Reply {
        if principal_id != self.owner_id {
            tracing::warn!("rejected command from someone other than the owner");
            return Reply::ephemeral("Only the bot owner can use this command.");
        }

        let Some(command) = Command::parse(command_name) else {
            return Reply::ephemeral(format!("Unknown command `{command_name}`."));
        };

        match command {
            Command::Authorize => self.issue_authorization_link().await,
            Command::Status => self.status().await,
            Command::Refresh => match self.reconciler.run_cycle().await {
                Ok(outcome) => Reply::ephemeral(format!("Now-playing message {outcome}.")),
                Err(e) => Reply::ephemeral(format!("Refresh failed: {}", describe_error(&e))),
            },
        }
    }

    async fn issue_authorization_link(&self) -> Reply {
        let request = AuthorizationRequest::new(self.redirect_uri.clone());
        let url = self.oauth.authorize_url(&request);
        *self.pending.lock().await = Some(request);
        tracing::info!("issued Spotify authorization link");

        Reply::ephemeral(format!(
            "Authorize Spotify access here: {url}\n\
             Only the most recent link works."
        ))
    }

    async fn status(&self) -> Reply {
        let status = self.reconciler.status();
        let mut content = format!(
            "Polling every {}s, currently {}.\nCycles run: {}.",
            status.interval.as_secs(),
            status.phase,
            status.cycles
        );
        if let Some(last) = &status.last_cycle {
            let at = last.finished_at.as_second();
            let _ = match &last.result {
                Ok(outcome) => write!(content, "\nLast cycle <t:{at}:R>: message {outcome}."),
                Err(error) => write!(content, "\nLast cycle <t:{at}:R> failed: {error}."),
            };
        }
        let credential = if self.tokens.has_refresh_token().await {
            "held"
        } else {
            "missing, use /getrefreshtoken"
        };
        let _ = write!(content, "\nSpotify authorization: {credential}.");
        let _ = match self.reconciler.output_handle().await {
            Some(id) => write!(content, "\nNow-playing message: {id}."),
            None => write!(content, "\nNow-playing message: not posted yet."),
        };
        Reply::ephemeral(content)
    }

    /// Finishes an authorization started by [`Command::Authorize`].
    ///
    /// `state` must match the outstanding link, which is then used up. Callbacks without a state,
    /// or with no link outstanding, are refused before any exchange. The resulting credentials
    /// replace whatever the store held.
    #[tracing::instrument(skip_all, err(Display))]
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: Option<&str>,
    ) -> Result<(), CallbackError> {
        // Links from this bot always carry a state, and Spotify echoes it back.
        let Some(state) = state else {
            tracing::warn!("rejected authorization callback without state");
            return Err(CallbackError::MissingState);
        };
        let redirect_uri = {
            let mut pending = self.pending.lock().await;
            match pending.take() {
                Some(request) if request.state.secret() == state => request.redirect_uri,
                other => {
                    *pending = other;
                    tracing::warn!("rejected authorization callback with unknown state");
                    return Err(CallbackError::StateMismatch);
                }
            }
        };

        let credentials = self
            .oauth
            .exchange_authorization_code(code, &redirect_uri)
            .await?;
        if credentials.refresh_token.is_none() {
            tracing::warn!("authorization did not return a refresh token");
        }
        self.tokens.set(credentials).await;
        tracing::info!("Spotify authorization complete");
        Ok(())
    }
}
