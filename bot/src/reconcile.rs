//! The polling loop that keeps the now-playing message current.
//!
//! Each cycle fetches the playback state (refreshing the access token and retrying once if
//! Spotify rejects it), renders it, and reconciles it into the single message the bot owns:
//! create it if we have none, edit it if we do, and recreate it if someone deleted it.
//!
//! Cycles never overlap. The output handle lives behind a lock that a cycle holds from start to
//! finish, so a cycle forced by a command simply waits for a running timer cycle to finish.
//! The next timer cycle is scheduled only after the previous one completes, so the actual period
//! is the interval plus however long the cycle took.

use crate::card::NowPlayingCard;
use crate::discord::{ChatSurface, MessageId, ReconcileError};
use crate::oauth::{AuthError, TokenExchanger};
use crate::snapshot::PlaybackSnapshot;
use crate::spotify_api::{FetchError, PlaybackSource};
use crate::token_store::TokenStore;
use jiff::Timestamp;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};

/// What the loop is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Reconciling,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Fetching => "fetching",
            Phase::Reconciling => "reconciling",
        })
    }
}

/// How a successful cycle touched the output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Created,
    Edited,
    /// The tracked message had disappeared and a replacement was posted.
    Recreated,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CycleOutcome::Created => "created",
            CycleOutcome::Edited => "updated",
            CycleOutcome::Recreated => "recreated",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("could not obtain a Spotify access token")]
    Auth(#[from] AuthError),
    #[error("Spotify rejected a freshly refreshed access token")]
    StillUnauthorized,
    #[error("could not fetch playback state")]
    Fetch(#[from] FetchError),
    #[error("could not update the now-playing message")]
    Reconcile(#[from] ReconcileError),
    #[error("polling cycle panicked")]
    Panicked,
}

impl CycleError {
    /// How long upstream asked us to back off, if it did.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CycleError::Fetch(FetchError::RateLimited { retry_after })
            | CycleError::Reconcile(ReconcileError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

/// Renders an error with its whole source chain on one line.
pub fn describe_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut description = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub finished_at: Timestamp,
    /// The outcome, or the rendered error chain.
    pub result: Result<CycleOutcome, String>,
}

/// Liveness information published after every phase change.
#[derive(Debug, Clone)]
pub struct LoopStatus {
    pub phase: Phase,
    pub interval: Duration,
    pub cycles: u64,
    pub last_cycle: Option<CycleReport>,
}

pub struct ReconciliationLoop<E, P, C> {
    tokens: Arc<TokenStore>,
    exchanger: Arc<E>,
    playback: P,
    chat: C,
    /// The one message this bot owns. Held for the whole of a cycle.
    output: Mutex<Option<MessageId>>,
    interval: Duration,
    status: watch::Sender<LoopStatus>,
}

impl<E, P, C> fmt::Debug for ReconciliationLoop<E, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationLoop")
            .field("interval", &self.interval)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<E, P, C> ReconciliationLoop<E, P, C>
where
    E: TokenExchanger,
    P: PlaybackSource,
    C: ChatSurface,
{
    pub fn new(
        tokens: Arc<TokenStore>,
        exchanger: Arc<E>,
        playback: P,
        chat: C,
        interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(LoopStatus {
            phase: Phase::Idle,
            interval,
            cycles: 0,
            last_cycle: None,
        });
        Self {
            tokens,
            exchanger,
            playback,
            chat,
            output: Mutex::new(None),
            interval,
            status,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    pub async fn output_handle(&self) -> Option<MessageId> {
        self.output.lock().await.clone()
    }

    /// Starts tracking a message that already exists, such as one left by a previous run.
    ///
    /// If the message is gone the handle stays empty and the next cycle posts a new one.
    #[tracing::instrument(skip(self), fields(message_id = %id))]
    pub async fn adopt(&self, id: MessageId) -> Result<(), ReconcileError> {
        let mut output = self.output.lock().await;
        match self.chat.fetch_message(&id).await {
            Ok(()) => {
                tracing::info!("adopted existing now-playing message");
                *output = Some(id);
                Ok(())
            }
            Err(ReconcileError::OutputTargetMissing) => {
                tracing::warn!("configured message no longer exists, a new one will be posted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Runs one fetch-and-reconcile cycle.
    ///
    /// Waits for any cycle already in progress. Failures are logged and returned; nothing is
    /// retried beyond the single post-refresh fetch.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        let mut output = self.output.lock().await;
        self.set_phase(Phase::Fetching);

        let result = async {
            let snapshot = self.fetch_with_refresh().await?;
            self.set_phase(Phase::Reconciling);
            let card = NowPlayingCard::render(&snapshot, Timestamp::now());
            self.reconcile(&mut output, &card).await
        }
        .await;

        match &result {
            Ok(outcome) => tracing::debug!(%outcome, "polling cycle finished"),
            Err(e) => tracing::warn!(error = %describe_error(e), "polling cycle failed"),
        }
        self.record(result.as_ref().copied().map_err(|e| describe_error(e)));
        result
    }

    /// Runs cycles until the process exits.
    ///
    /// Each cycle runs on its own task so that even a panic only costs that one cycle. The
    /// next cycle is always scheduled, whatever happened to the previous one.
    pub async fn run_forever(self: Arc<Self>)
    where
        E: 'static,
        P: 'static,
        C: 'static,
    {
        tracing::info!(interval = ?self.interval, "starting polling loop");
        loop {
            let this = Arc::clone(&self);
            let result = match tokio::spawn(async move { this.run_cycle().await }).await {
                Ok(result) => result,
                Err(join_error) => {
                    tracing::error!(error = %join_error, "polling cycle aborted");
                    self.record(Err(CycleError::Panicked.to_string()));
                    Err(CycleError::Panicked)
                }
            };
            tokio::time::sleep(self.next_delay(&result)).await;
        }
    }

    /// The pause before the next cycle: the interval, stretched if upstream asked us to wait.
    pub(crate) fn next_delay(&self, result: &Result<CycleOutcome, CycleError>) -> Duration {
        match result.as_ref().err().and_then(CycleError::retry_after) {
            Some(retry_after) if retry_after > self.interval => {
                tracing::info!(?retry_after, "backing off after rate limit");
                retry_after
            }
            _ => self.interval,
        }
    }

    async fn fetch_with_refresh(&self) -> Result<PlaybackSnapshot, CycleError> {
        let mut lease = match self.tokens.get().await {
            Some(lease) => lease,
            None => self.tokens.refresh(&*self.exchanger, None).await?,
        };

        // At most two fetches: the original and one after refreshing.
        let mut refreshed = false;
        loop {
            match self
                .playback
                .fetch_current_playback(&lease.access_token)
                .await
            {
                Ok(snapshot) => return Ok(snapshot),
                Err(FetchError::Unauthorized) if !refreshed => {
                    tracing::debug!("access token rejected, refreshing and retrying once");
                    self.tokens.invalidate(lease.generation).await;
                    lease = self
                        .tokens
                        .refresh(&*self.exchanger, Some(lease.generation))
                        .await?;
                    refreshed = true;
                }
                Err(FetchError::Unauthorized) => return Err(CycleError::StillUnauthorized),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn reconcile(
        &self,
        output: &mut Option<MessageId>,
        card: &NowPlayingCard,
    ) -> Result<CycleOutcome, CycleError> {
        let Some(id) = output.clone() else {
            let id = self.chat.send_message(card).await?;
            tracing::info!(message_id = %id, "posted now-playing message");
            *output = Some(id);
            return Ok(CycleOutcome::Created);
        };

        match self.chat.edit_message(&id, card).await {
            Ok(()) => Ok(CycleOutcome::Edited),
            Err(ReconcileError::OutputTargetMissing) => {
                tracing::warn!(message_id = %id, "now-playing message was deleted, posting a new one");
                let replacement = self.chat.send_message(card).await?;
                tracing::info!(message_id = %replacement, "posted replacement now-playing message");
                *output = Some(replacement);
                Ok(CycleOutcome::Recreated)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.status.send_modify(|status| status.phase = phase);
    }

    fn record(&self, result: Result<CycleOutcome, String>) {
        self.status.send_modify(|status| {
            status.phase = Phase::Idle;
            status.cycles += 1;
            status.last_cycle = Some(CycleReport {
                finished_at: Timestamp::now(),
                result,
            });
        });
    }
}
