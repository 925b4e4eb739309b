//! Loopback servers and in-process fakes shared by the unit tests.

use crate::card::NowPlayingCard;
use crate::discord::{ChatSurface, MessageId, ReconcileError};
use crate::gateway::CommandGateway;
use crate::oauth::{AuthError, AuthorizationRequest, Credentials, TokenExchanger};
use crate::reconcile::ReconciliationLoop;
use crate::snapshot::PlaybackSnapshot;
use crate::spotify_api::{FetchError, PlaybackSource};
use crate::token_store::TokenStore;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use oauth2::url::Url;
use oauth2::{AccessToken, RedirectUrl, RefreshToken};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;

pub(crate) const OWNER: &str = "owner-1";
pub(crate) const REDIRECT_URI: &str = "http://localhost:8080/callback";

/// A request as seen by a loopback server, with its body already collected.
#[derive(Debug)]
pub(crate) struct RecordedRequest {
    pub parts: http::request::Parts,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

pub(crate) type Handler =
    Box<dyn Fn(RecordedRequest) -> Response<Full<Bytes>> + Send + Sync + 'static>;

/// Serves `handler` on an ephemeral loopback port until the test runtime shuts down.
pub(crate) async fn serve<F>(handler: F) -> SocketAddr
where
    F: Fn(RecordedRequest) -> Response<Full<Bytes>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((conn, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = Arc::clone(&handler);
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await?.to_bytes();
                        Ok::<_, hyper::Error>(handler(RecordedRequest { parts, body }))
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(conn), service)
                    .await;
            });
        }
    });
    addr
}

pub(crate) fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

pub(crate) fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// An address nothing is listening on.
pub(crate) async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub(crate) fn signing_key() -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::from_bytes(&[7u8; 32])
}

pub(crate) fn active(title: &str, artists: &[&str], progress_ms: u64, duration_ms: u64) -> PlaybackSnapshot {
    PlaybackSnapshot::active(
        title,
        artists.iter().map(|a| a.to_string()).collect(),
        None,
        progress_ms,
        duration_ms,
    )
}

#[derive(Debug, Default)]
struct ExchangerState {
    refresh_calls: usize,
    refresh_tokens_seen: Vec<String>,
    codes_redeemed: HashSet<String>,
    code_exchanges: usize,
}

/// Token endpoint stand-in.
///
/// Access tokens are numbered `access-1`, `access-2`, ... in issue order. Codes are single-use,
/// and `"bad"` is never accepted.
#[derive(Debug, Default)]
pub(crate) struct FakeExchanger {
    rotate: bool,
    reject_refresh: bool,
    delay: Option<Duration>,
    state: Mutex<ExchangerState>,
}

impl FakeExchanger {
    /// Issue a new refresh token (`refresh-{n}`) with every refresh.
    pub fn rotating(mut self) -> Self {
        self.rotate = true;
        self
    }

    /// Answer every refresh with `invalid_grant`.
    pub fn rejecting_refresh(mut self) -> Self {
        self.reject_refresh = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.lock().unwrap().refresh_tokens_seen.clone()
    }

    pub fn code_exchanges(&self) -> usize {
        self.state.lock().unwrap().code_exchanges
    }
}

fn invalid_grant() -> AuthError {
    AuthError::UpstreamRejected {
        error: "invalid_grant".to_string(),
        description: None,
    }
}

fn fresh_expiry() -> Option<SystemTime> {
    Some(SystemTime::now() + Duration::from_secs(3300))
}

impl TokenExchanger for FakeExchanger {
    fn authorize_url(&self, request: &AuthorizationRequest) -> Url {
        let mut url = Url::parse("https://accounts.example/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("redirect_uri", request.redirect_uri.as_str())
            .append_pair("state", request.state.secret());
        url
    }

    async fn exchange_authorization_code(
        &self,
        code: &str,
        _redirect_uri: &RedirectUrl,
    ) -> Result<Credentials, AuthError> {
        let mut state = self.state.lock().unwrap();
        state.code_exchanges += 1;
        if code == "bad" || !state.codes_redeemed.insert(code.to_string()) {
            return Err(invalid_grant());
        }
        Ok(Credentials {
            access_token: AccessToken::new(format!("access-from-{code}")),
            refresh_token: Some(RefreshToken::new("refresh-granted".to_string())),
            expires_at: fresh_expiry(),
        })
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<Credentials, AuthError> {
        let n = {
            let mut state = self.state.lock().unwrap();
            state.refresh_calls += 1;
            state
                .refresh_tokens_seen
                .push(refresh_token.secret().to_string());
            state.refresh_calls
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_refresh {
            return Err(invalid_grant());
        }
        Ok(Credentials {
            access_token: AccessToken::new(format!("access-{n}")),
            refresh_token: self
                .rotate
                .then(|| RefreshToken::new(format!("refresh-{n}"))),
            expires_at: fresh_expiry(),
        })
    }
}

#[derive(Debug, Default)]
struct PlaybackState {
    script: VecDeque<Result<PlaybackSnapshot, FetchError>>,
    tokens_seen: Vec<String>,
    started: Vec<tokio::time::Instant>,
    delay: Option<Duration>,
}

/// Playback endpoint stand-in that replays a script, then reports nothing playing.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakePlayback {
    state: Arc<Mutex<PlaybackState>>,
}

impl FakePlayback {
    pub fn push(&self, result: Result<PlaybackSnapshot, FetchError>) {
        self.state.lock().unwrap().script.push_back(result);
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().tokens_seen.len()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens_seen.clone()
    }

    /// Makes every fetch take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    /// When each fetch began, on tokio's clock.
    pub fn fetch_starts(&self) -> Vec<tokio::time::Instant> {
        self.state.lock().unwrap().started.clone()
    }
}

impl PlaybackSource for FakePlayback {
    async fn fetch_current_playback(
        &self,
        access_token: &AccessToken,
    ) -> Result<PlaybackSnapshot, FetchError> {
        let (result, delay) = {
            let mut state = self.state.lock().unwrap();
            state.tokens_seen.push(access_token.secret().to_string());
            state.started.push(tokio::time::Instant::now());
            let result = state.script.pop_front().unwrap_or(Ok(PlaybackSnapshot::Empty));
            (result, state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChatCall {
    /// Serialized card.
    Send(String),
    Edit(MessageId, String),
    Fetch(MessageId),
    InteractionReply { token: String, content: String },
}

#[derive(Debug, Default)]
struct ChatState {
    live: HashSet<MessageId>,
    next_id: u64,
    calls: Vec<ChatCall>,
}

impl ChatState {
    fn allocate(&mut self) -> MessageId {
        self.next_id += 1;
        let id = MessageId(format!("msg-{}", self.next_id));
        self.live.insert(id.clone());
        id
    }
}

/// A channel that remembers which messages exist and every call made to it.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeChat {
    state: Arc<Mutex<ChatState>>,
}

impl FakeChat {
    pub fn calls(&self) -> Vec<ChatCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Deletes a message as a channel moderator would.
    pub fn delete(&self, id: &MessageId) {
        self.state.lock().unwrap().live.remove(id);
    }

    /// Creates a message out of band, as a previous run of the bot would have.
    pub fn seed_message(&self) -> MessageId {
        self.state.lock().unwrap().allocate()
    }

    /// Waits for spawned work to make at least `count` calls.
    pub async fn wait_for_calls(&self, count: usize) -> Vec<ChatCall> {
        for _ in 0..200 {
            let calls = self.calls();
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} chat calls, got {:?}", self.calls());
    }
}

impl ChatSurface for FakeChat {
    async fn send_message(&self, card: &NowPlayingCard) -> Result<MessageId, ReconcileError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(ChatCall::Send(serde_json::to_string(card).unwrap()));
        Ok(state.allocate())
    }

    async fn edit_message(
        &self,
        id: &MessageId,
        card: &NowPlayingCard,
    ) -> Result<(), ReconcileError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ChatCall::Edit(
            id.clone(),
            serde_json::to_string(card).unwrap(),
        ));
        if state.live.contains(id) {
            Ok(())
        } else {
            Err(ReconcileError::OutputTargetMissing)
        }
    }

    async fn fetch_message(&self, id: &MessageId) -> Result<(), ReconcileError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ChatCall::Fetch(id.clone()));
        if state.live.contains(id) {
            Ok(())
        } else {
            Err(ReconcileError::OutputTargetMissing)
        }
    }

    async fn reply_to_interaction(
        &self,
        interaction_token: &str,
        content: &str,
    ) -> Result<(), ReconcileError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(ChatCall::InteractionReply {
                token: interaction_token.to_string(),
                content: content.to_string(),
            });
        Ok(())
    }
}

pub(crate) type TestLoop = ReconciliationLoop<FakeExchanger, FakePlayback, FakeChat>;
pub(crate) type TestGateway = CommandGateway<FakeExchanger, FakePlayback, FakeChat>;

/// The whole bot wired up against fakes, with a 10 second polling interval.
pub(crate) struct Harness {
    pub tokens: Arc<TokenStore>,
    pub exchanger: Arc<FakeExchanger>,
    pub playback: FakePlayback,
    pub chat: FakeChat,
    pub reconciler: Arc<TestLoop>,
    pub gateway: Arc<TestGateway>,
}

impl Harness {
    /// Holds refresh token `refresh-0` but no access token yet.
    pub fn new() -> Self {
        Self::build(Some("refresh-0"), FakeExchanger::default())
    }

    pub fn without_refresh_token() -> Self {
        Self::build(None, FakeExchanger::default())
    }

    pub fn with_exchanger(exchanger: FakeExchanger) -> Self {
        Self::build(Some("refresh-0"), exchanger)
    }

    fn build(refresh_token: Option<&str>, exchanger: FakeExchanger) -> Self {
        let tokens = Arc::new(TokenStore::new(
            refresh_token.map(|token| RefreshToken::new(token.to_string())),
        ));
        let exchanger = Arc::new(exchanger);
        let playback = FakePlayback::default();
        let chat = FakeChat::default();
        let reconciler = Arc::new(ReconciliationLoop::new(
            Arc::clone(&tokens),
            Arc::clone(&exchanger),
            playback.clone(),
            chat.clone(),
            Duration::from_secs(10),
        ));
        let gateway = Arc::new(CommandGateway::new(
            OWNER,
            Arc::clone(&exchanger),
            Arc::clone(&tokens),
            Arc::clone(&reconciler),
            RedirectUrl::new(REDIRECT_URI.to_string()).unwrap(),
        ));
        Self {
            tokens,
            exchanger,
            playback,
            chat,
            reconciler,
            gateway,
        }
    }

    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        self.playback.set_delay(delay);
        self
    }

    pub fn with_playback(
        self,
        script: impl IntoIterator<Item = Result<PlaybackSnapshot, FetchError>>,
    ) -> Self {
        for result in script {
            self.playback.push(result);
        }
        self
    }
}
