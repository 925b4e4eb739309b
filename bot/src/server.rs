//! The bot's HTTP surface: the OAuth redirect target, Discord's interaction webhook, and a
//! health check.
//!
//! | Route                | Purpose                                              |
//! |----------------------|------------------------------------------------------|
//! | `GET /callback`      | Spotify sends the owner here after the consent page  |
//! | `POST /interactions` | Discord delivers slash-command invocations here      |
//! | `GET /healthz`       | Liveness check                                       |

use crate::discord::ChatSurface;
use crate::discord::interactions::{
    self, APPLICATION_COMMAND, Interaction, InteractionResponse, PING, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use crate::gateway::{CallbackError, CommandGateway};
use crate::oauth::TokenExchanger;
use crate::reconcile::describe_error;
use crate::spotify_api::PlaybackSource;
use bytes::Bytes;
use ed25519_dalek::VerifyingKey;
use eyre::Context;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use jiff::Timestamp;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Interaction payloads are small; anything bigger is not from Discord.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Everything the request handlers need.
pub struct AppState<E, P, C> {
    pub gateway: Arc<CommandGateway<E, P, C>>,
    /// Used to deliver command replies after the initial acknowledgement.
    pub chat: C,
    pub public_key: VerifyingKey,
    /// Shown to the owner once authorization succeeds.
    pub success_page: &'static str,
}

/// Accepts connections on `listener` until the process exits.
pub async fn serve<E, P, C>(listener: TcpListener, state: Arc<AppState<E, P, C>>) -> eyre::Result<()>
where
    E: TokenExchanger + 'static,
    P: PlaybackSource + 'static,
    C: ChatSurface + 'static,
{
    let addr = listener.local_addr().context("get listen address")?;
    tracing::info!(%addr, "listening for OAuth callbacks and interactions");

    loop {
        let (conn, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service =
                service_fn(move |req: Request<Incoming>| route(Arc::clone(&state), req));
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(conn), service)
                .await
            {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

pub(crate) async fn route<E, P, C, B>(
    state: Arc<AppState<E, P, C>>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    E: TokenExchanger + 'static,
    P: PlaybackSource + 'static,
    C: ChatSurface + 'static,
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => text(StatusCode::OK, "ok"),
        (&Method::GET, "/callback") => {
            let query = req.uri().query().unwrap_or("").to_string();
            callback(&state, &query).await
        }
        (&Method::POST, "/interactions") => interaction(&state, req).await,
        (_, "/healthz" | "/callback" | "/interactions") => {
            text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

async fn callback<E, P, C>(state: &AppState<E, P, C>, query: &str) -> Response<Full<Bytes>>
where
    E: TokenExchanger,
    P: PlaybackSource,
    C: ChatSurface,
{
    let mut code = None;
    let mut oauth_state = None;
    let mut error = None;
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        match &*k {
            "code" => code = Some(v),
            "state" => oauth_state = Some(v),
            "error" => error = Some(v),
            _ => {}
        }
    }

    if let Some(error) = error {
        tracing::warn!(%error, "Spotify authorization was not granted");
        return text(
            StatusCode::BAD_REQUEST,
            format!("Spotify authorization failed ({error}). Request a new link and try again."),
        );
    }
    let Some(code) = code else {
        return text(StatusCode::BAD_REQUEST, "no authorization code found");
    };

    match state
        .gateway
        .complete_authorization(&code, oauth_state.as_deref())
        .await
    {
        Ok(()) => {
            let mut response = Response::new(Full::new(Bytes::from(state.success_page)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }
        Err(e @ (CallbackError::StateMismatch | CallbackError::MissingState)) => {
            text(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ CallbackError::Auth(_)) => text(StatusCode::BAD_GATEWAY, describe_error(&e)),
    }
}

async fn interaction<E, P, C, B>(
    state: &Arc<AppState<E, P, C>>,
    req: Request<B>,
) -> Response<Full<Bytes>>
where
    E: TokenExchanger + 'static,
    P: PlaybackSource + 'static,
    C: ChatSurface + 'static,
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let (Some(signature), Some(timestamp)) = (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER))
    else {
        return text(StatusCode::UNAUTHORIZED, "missing request signature");
    };

    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "could not read interaction body");
            return text(StatusCode::PAYLOAD_TOO_LARGE, "request body rejected");
        }
    };

    if !interactions::verify_signature(&state.public_key, &signature, &timestamp, &body) {
        tracing::warn!("rejected interaction with invalid signature");
        return text(StatusCode::UNAUTHORIZED, "invalid request signature");
    }
    if !interactions::is_fresh(&timestamp, Timestamp::now()) {
        tracing::warn!(%timestamp, "rejected interaction with stale signature timestamp");
        return text(StatusCode::UNAUTHORIZED, "stale request signature");
    }

    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(interaction) => interaction,
        Err(e) => {
            tracing::debug!(error = %e, "malformed interaction payload");
            return text(StatusCode::BAD_REQUEST, "malformed interaction");
        }
    };

    match interaction.kind {
        PING => json(&InteractionResponse::pong()),
        APPLICATION_COMMAND => {
            let Some(name) = interaction.command_name().map(str::to_string) else {
                return json(&InteractionResponse::ephemeral("Missing command name."));
            };
            let invoker = interaction.invoker_id().unwrap_or_default().to_string();
            let token = interaction.token;
            let state = Arc::clone(state);

            // Discord wants an answer within 3 seconds; a cycle can take longer.
            tokio::spawn(async move {
                let reply = state.gateway.handle_invocation(&invoker, &name).await;
                if let Err(e) = state
                    .chat
                    .reply_to_interaction(&token, &reply.content)
                    .await
                {
                    tracing::warn!(command = %name, error = %describe_error(&e), "could not deliver command reply");
                }
            });
            json(&InteractionResponse::deferred_ephemeral())
        }
        kind => {
            tracing::debug!(kind, "ignoring unsupported interaction type");
            text(StatusCode::BAD_REQUEST, "unsupported interaction type")
        }
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json(value: &impl Serialize) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "could not serialize interaction response");
            text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
