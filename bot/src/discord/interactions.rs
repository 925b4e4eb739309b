//! Inbound Discord interactions delivered to our HTTP endpoint.
//!
//! Discord signs every request with the application's Ed25519 key and refuses to use an endpoint
//! that accepts unsigned ones, so [`verify_signature`] runs before anything is parsed.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Interaction `type` values we care about.
pub const PING: u8 = 1;
pub const APPLICATION_COMMAND: u8 = 2;

/// Interaction response `type` values.
const PONG: u8 = 1;
const CHANNEL_MESSAGE_WITH_SOURCE: u8 = 4;
const DEFERRED_CHANNEL_MESSAGE_WITH_SOURCE: u8 = 5;

const EPHEMERAL: u64 = 1 << 6;

/// How far a signed timestamp may drift from our clock, in either direction.
pub const MAX_SIGNATURE_SKEW_SECONDS: i64 = 5 * 60;

/// The subset of an interaction payload the bot reads.
///
/// See: <https://discord.com/developers/docs/interactions/receiving-and-responding#interaction-object>
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    /// Continuation token for follow-up responses, valid for 15 minutes.
    pub token: String,
    pub data: Option<CommandData>,
    /// Set when invoked in a guild.
    pub member: Option<Member>,
    /// Set when invoked in a DM.
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandData {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
}

impl Interaction {
    /// The user who triggered the interaction, wherever it happened.
    pub fn invoker_id(&self) -> Option<&str> {
        self.member
            .as_ref()
            .map(|member| &member.user)
            .or(self.user.as_ref())
            .map(|user| user.id.as_str())
    }

    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref().map(|data| data.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<ResponseData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    flags: u64,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: PONG,
            data: None,
        }
    }

    /// "Bot is thinking..." visible only to the invoker; the answer follows as an edit.
    pub fn deferred_ephemeral() -> Self {
        Self {
            kind: DEFERRED_CHANNEL_MESSAGE_WITH_SOURCE,
            data: Some(ResponseData {
                content: None,
                flags: EPHEMERAL,
            }),
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            kind: CHANNEL_MESSAGE_WITH_SOURCE,
            data: Some(ResponseData {
                content: Some(content.into()),
                flags: EPHEMERAL,
            }),
        }
    }
}

/// Parses the hex-encoded application public key from the developer portal.
pub fn parse_public_key(hex_key: &str) -> eyre::Result<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key.trim())
        .map_err(|e| eyre::eyre!("public key is not hex: {e}"))?
        .try_into()
        .map_err(|bytes: Vec<u8>| eyre::eyre!("public key is {} bytes, expected 32", bytes.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| eyre::eyre!("invalid Ed25519 public key: {e}"))
}

/// Checks Discord's signature over `timestamp ‖ body`.
pub fn verify_signature(
    public_key: &VerifyingKey,
    signature_hex: &str,
    timestamp: &str,
    body: &[u8],
) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = <[u8; 64]>::try_from(signature.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature);

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    public_key.verify(&message, &signature).is_ok()
}

/// Whether the Unix-seconds `timestamp` Discord signed is close enough to `now` to act on.
///
/// A captured request replayed later carries a valid signature, so the signature alone is not
/// enough.
pub fn is_fresh(timestamp: &str, now: Timestamp) -> bool {
    let Ok(signed_at) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    signed_at
        .checked_sub(now.as_second())
        .is_some_and(|skew| skew.abs() <= MAX_SIGNATURE_SKEW_SECONDS)
}
