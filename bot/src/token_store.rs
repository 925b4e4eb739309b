//! The one set of Spotify credentials the bot works with.

use crate::oauth::{AuthError, Credentials, TokenExchanger};
use oauth2::{AccessToken, RefreshToken};
use std::time::SystemTime;
use tokio::sync::Mutex;

/// An access token together with the generation of the credentials it came from.
///
/// The generation lets a caller that saw the token fail tell whether someone else has already
/// replaced it.
#[derive(Debug, Clone)]
pub struct Lease {
    pub access_token: AccessToken,
    pub generation: u64,
}

#[derive(Debug)]
struct Held {
    access_token: Option<AccessToken>,
    expires_at: Option<SystemTime>,
    refresh_token: Option<RefreshToken>,
    generation: u64,
}

impl Held {
    fn usable(&self, now: SystemTime) -> Option<Lease> {
        let access_token = self.access_token.as_ref()?;
        if self.expires_at.is_some_and(|expires_at| now >= expires_at) {
            return None;
        }
        Some(Lease {
            access_token: access_token.clone(),
            generation: self.generation,
        })
    }
}

/// Holds the current access token, its assumed expiry, and the long-lived refresh token.
///
/// All mutation goes through one lock, and [`TokenStore::refresh`] holds it for the duration of
/// the upstream call, so concurrent refreshes collapse into a single token request.
#[derive(Debug)]
pub struct TokenStore {
    held: Mutex<Held>,
}

impl TokenStore {
    pub fn new(refresh_token: Option<RefreshToken>) -> Self {
        Self {
            held: Mutex::new(Held {
                access_token: None,
                expires_at: None,
                refresh_token,
                generation: 0,
            }),
        }
    }

    /// Returns the access token if one is held and not past its assumed expiry.
    pub async fn get(&self) -> Option<Lease> {
        self.held.lock().await.usable(SystemTime::now())
    }

    /// Installs freshly exchanged credentials.
    ///
    /// A refresh token in `credentials` always replaces the stored one; when absent the stored
    /// one is kept.
    pub async fn set(&self, credentials: Credentials) -> Lease {
        let mut held = self.held.lock().await;
        Self::install(&mut held, credentials)
    }

    /// Drops the access token of `generation` after upstream rejected it.
    ///
    /// A no-op if the token has already been replaced by a newer generation.
    pub async fn invalidate(&self, generation: u64) {
        let mut held = self.held.lock().await;
        if held.generation == generation {
            tracing::debug!(generation, "invalidating rejected access token");
            held.access_token = None;
            held.expires_at = None;
        }
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.held.lock().await.refresh_token.is_some()
    }

    /// Obtains a new access token with the stored refresh token.
    ///
    /// `stale` is the generation the caller found unusable, or `None` if it had no token at all.
    /// If another caller already refreshed while this one was waiting for the lock, the token it
    /// installed is returned without contacting upstream again.
    pub async fn refresh<E: TokenExchanger>(
        &self,
        exchanger: &E,
        stale: Option<u64>,
    ) -> Result<Lease, AuthError> {
        let mut held = self.held.lock().await;

        if let Some(lease) = held.usable(SystemTime::now())
            && Some(lease.generation) != stale
        {
            tracing::trace!(
                generation = lease.generation,
                "token already refreshed by another caller"
            );
            return Ok(lease);
        }

        let refresh_token = held
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;
        let credentials = exchanger.refresh_access_token(&refresh_token).await?;
        let lease = Self::install(&mut held, credentials);
        tracing::debug!(generation = lease.generation, "access token refreshed");
        Ok(lease)
    }

    fn install(held: &mut Held, credentials: Credentials) -> Lease {
        let Credentials {
            access_token,
            refresh_token,
            expires_at,
        } = credentials;

        if let Some(refresh_token) = refresh_token {
            held.refresh_token = Some(refresh_token);
        } else {
            tracing::trace!("new token lacks refresh token, preserving original");
        }
        held.access_token = Some(access_token.clone());
        held.expires_at = expires_at;
        held.generation += 1;

        Lease {
            access_token,
            generation: held.generation,
        }
    }
}
