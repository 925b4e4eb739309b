//! OAuth 2.0 management for Spotify Web API authentication.
//!
//! This module covers both halves of the credential lifecycle: turning an authorization code
//! from the consent redirect into a durable refresh token, and turning that refresh token into
//! short-lived access tokens. It never stores anything itself; callers hand the resulting
//! [`Credentials`] to a [`crate::token_store::TokenStore`].

use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::url::Url;
use oauth2::{
    AccessToken, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, HttpClientError,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl, reqwest,
};
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Spotify authorization endpoint the owner is sent to for consent.
pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";

/// Spotify token endpoint used for both initial authorization and token refresh.
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Permissions needed to read what is playing.
pub const SCOPES: &[&str] = &["user-read-playback-state", "user-read-currently-playing"];

/// Safety margin subtracted from `expires_in` so we refresh before upstream starts rejecting.
const EXPIRY_BUFFER: Duration = Duration::from_secs(300);

/// Assumed lifetime when the token endpoint does not say (one hour minus the buffer).
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3300);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token endpoint answered, but with an OAuth error (bad or replayed code, revoked grant).
    #[error("Spotify rejected the token request: {error}")]
    UpstreamRejected {
        error: String,
        description: Option<String>,
    },
    #[error("could not reach the Spotify token endpoint")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("no Spotify refresh token is available; run the authorization command first")]
    MissingRefreshToken,
}

impl AuthError {
    fn from_token_request(
        error: RequestTokenError<HttpClientError<reqwest::Error>, BasicErrorResponse>,
    ) -> Self {
        match error {
            RequestTokenError::ServerResponse(response) => Self::UpstreamRejected {
                error: response.error().to_string(),
                description: response.error_description().cloned(),
            },
            RequestTokenError::Request(e) => Self::Transport(Box::new(e)),
            RequestTokenError::Parse(e, body) => {
                // Some servers report errors with a 200; look for the error field ourselves.
                match serde_json::from_slice::<BasicErrorResponse>(&body) {
                    Ok(response) => Self::UpstreamRejected {
                        error: response.error().to_string(),
                        description: response.error_description().cloned(),
                    },
                    Err(_) => Self::UpstreamRejected {
                        error: "invalid_response".to_string(),
                        description: Some(e.to_string()),
                    },
                }
            }
            RequestTokenError::Other(message) => Self::UpstreamRejected {
                error: "invalid_response".to_string(),
                description: Some(message),
            },
        }
    }
}

/// Access and refresh credentials as returned by one token exchange.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: AccessToken,
    /// Present on first authorization; on refresh only when Spotify rotates it.
    pub refresh_token: Option<RefreshToken>,
    /// When the access token should be considered expired (with safety buffer).
    pub expires_at: Option<SystemTime>,
}

impl Credentials {
    fn from_response(token: &BasicTokenResponse) -> Self {
        let now = SystemTime::now();
        let lifetime = token
            .expires_in()
            .map(|expires_in| expires_in.saturating_sub(EXPIRY_BUFFER))
            .unwrap_or(DEFAULT_LIFETIME);
        Self {
            access_token: token.access_token().clone(),
            refresh_token: token.refresh_token().cloned(),
            expires_at: Some(now + lifetime),
        }
    }
}

/// Correlates an outbound authorization link with the callback it eventually produces.
///
/// Only one request is outstanding at a time; issuing a new one supersedes the old one.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: CsrfToken,
    pub redirect_uri: RedirectUrl,
}

impl AuthorizationRequest {
    pub fn new(redirect_uri: RedirectUrl) -> Self {
        Self {
            state: CsrfToken::new_random(),
            redirect_uri,
        }
    }
}

/// The token-endpoint operations the rest of the bot relies on.
///
/// Implementations never retry; retry policy belongs to the caller.
pub trait TokenExchanger: Send + Sync {
    /// Builds the consent URL the owner must visit for `request`.
    fn authorize_url(&self, request: &AuthorizationRequest) -> Url;

    fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &RedirectUrl,
    ) -> impl Future<Output = Result<Credentials, AuthError>> + Send;

    fn refresh_access_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> impl Future<Output = Result<Credentials, AuthError>> + Send;
}

/// Manages OAuth 2.0 flows against the Spotify accounts service.
///
/// Client identity is sent as an HTTP Basic authorization header on every token request.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    client_id: ClientId,
    client_secret: ClientSecret,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    http_client: reqwest::Client,
}

impl OAuthManager {
    /// Creates a manager talking to the real Spotify endpoints.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded endpoint URLs are malformed (they are static and valid).
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_endpoints(
            client_id,
            client_secret,
            AuthUrl::new(AUTHORIZE_URL.to_string()).expect("Invalid authorization endpoint URL"),
            TokenUrl::new(TOKEN_URL.to_string()).expect("Invalid token endpoint URL"),
        )
    }

    /// Creates a manager talking to arbitrary endpoints.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built, which does not happen with this configuration.
    pub fn with_endpoints(
        client_id: String,
        client_secret: String,
        auth_url: AuthUrl,
        token_url: TokenUrl,
    ) -> Self {
        let http_client = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("building reqwest client should not fail");
        Self {
            client_id: ClientId::new(client_id),
            client_secret: ClientSecret::new(client_secret),
            auth_url,
            token_url,
            http_client,
        }
    }
}

impl TokenExchanger for OAuthManager {
    fn authorize_url(&self, request: &AuthorizationRequest) -> Url {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(request.redirect_uri.clone());

        let state = request.state.clone();
        let (url, _state) = client
            .authorize_url(move || state)
            .add_scopes(SCOPES.iter().map(|scope| Scope::new(scope.to_string())))
            .url();
        url
    }

    #[tracing::instrument(skip_all, err)]
    async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &RedirectUrl,
    ) -> Result<Credentials, AuthError> {
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(redirect_uri.clone());

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(AuthError::from_token_request)?;

        let credentials = Credentials::from_response(&token);
        tracing::debug!(
            has_refresh_token = credentials.refresh_token.is_some(),
            "exchanged authorization code"
        );
        Ok(credentials)
    }

    #[tracing::instrument(skip_all, err)]
    async fn refresh_access_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<Credentials, AuthError> {
        tracing::debug!("attempting to refresh OAuth token");

        // No redirect URL is needed to refresh.
        let client = BasicClient::new(self.client_id.clone())
            .set_client_secret(self.client_secret.clone())
            .set_token_uri(self.token_url.clone());

        let token = client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http_client)
            .await
            .map_err(AuthError::from_token_request)?;

        let credentials = Credentials::from_response(&token);
        if credentials.refresh_token.is_some() {
            tracing::debug!("refresh response rotated the refresh token");
        }
        Ok(credentials)
    }
}
