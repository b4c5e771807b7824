//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};

/// RFC7807 Problem Details (application/problem+json)
///
/// The hub's negotiate endpoint answers failures in this shape, so the
/// transport can surface the server's explanation instead of a bare status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    #[serde(default)]
    pub title: String,
    /// HTTP status code.
    #[serde(default)]
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Errors produced by the realtime hub client.
///
/// `Clone` because a single handshake outcome is handed to every caller
/// that coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The operation needs an established connection.
    #[error("not connected to the game hub")]
    NotConnected,
    /// Negotiation, WebSocket upgrade or protocol handshake failed.
    #[error("hub handshake failed: {0}")]
    Handshake(String),
    /// The link failed while sending or receiving.
    #[error("hub transport error: {0}")]
    Transport(String),
    /// The link went away before the server answered.
    #[error("connection lost before the hub answered")]
    ConnectionLost,
    /// The server completed an invocation with an error.
    #[error("hub method `{method}` failed: {message}")]
    Invocation { method: String, message: String },
    /// The server did not complete an invocation in time.
    #[error("hub method `{method}` timed out")]
    Timeout { method: String },
    /// A frame could not be decoded or encoded.
    #[error("hub protocol error: {0}")]
    Protocol(String),
    /// Invalid client configuration.
    #[error("invalid hub configuration: {0}")]
    Config(String),
    /// Automatic reconnection gave up.
    #[error("reconnect abandoned: {0}")]
    ReconnectFailed(String),
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Protocol(err.to_string())
    }
}
