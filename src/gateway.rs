// External collaborators consumed by the sync engine.
//
// The engine never implements transport: history fetches, outbound sends,
// blob uploads and remote read receipts are all reached through this trait,
// which the surrounding application backs with its messaging gateway.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Message, SendContent};

/// Classification of an outbound send failure.
///
/// The taxonomy is load-bearing: it decides what the caller may do next, so
/// gateways must map their transport errors onto it rather than inventing
/// their own strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendErrorKind {
    /// The underlying messaging session/channel is disconnected. Retrying
    /// without reconnecting will only repeat the failure.
    SessionInvalid,
    /// The destination cannot receive messages at all. Terminal.
    RecipientInvalid,
    /// Network blip or rate limit. Eligible for user-initiated retry.
    Transient,
    /// Anything else. Treated as non-retryable but surfaced with raw detail.
    Unknown,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("send failed ({kind:?}): {detail}")]
pub struct SendError {
    pub kind: SendErrorKind,
    pub detail: String,
}

impl SendError {
    pub fn new(kind: SendErrorKind, detail: impl Into<String>) -> Self {
        SendError {
            kind,
            detail: detail.into(),
        }
    }

    /// Whether a user-initiated retry is worth offering. The engine itself
    /// never auto-retries in any class.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, SendErrorKind::Transient)
    }
}

/// Server acknowledgment of an accepted send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendAck {
    pub server_id: String,
    /// Server-assigned timestamp (milliseconds).
    pub timestamp: i64,
}

/// The messaging gateway the engine calls out to.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Fetch up to `limit` messages strictly older than `older_than`
    /// (milliseconds), newest-first over the wire. `None` means "the most
    /// recent messages".
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        older_than: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Perform the remote send. The client token is threaded through so the
    /// server can pair its acknowledgment (and any live event it emits) with
    /// the locally staged record.
    async fn send_remote(
        &self,
        conversation_id: &str,
        content: &SendContent,
        client_token: &str,
    ) -> std::result::Result<SendAck, SendError>;

    /// Upload a binary payload to durable storage, returning its URL. The
    /// key is the owning message's client token, so a retry overwrites the
    /// same logical blob.
    async fn upload(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<String>;

    /// Emit the remote read receipt for a conversation. Only invoked when
    /// the caller explicitly asks for it; local unread-count resets never
    /// trigger this on their own.
    async fn mark_read_remote(&self, conversation_id: &str) -> Result<()>;
}
