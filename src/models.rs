use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of the conversation a message belongs to.
pub type ConversationId = String;

/// Identifier of a tracked media job.
pub type JobId = String;

/// The resolved, de-duplicated key for a message across local and remote origins.
///
/// A message always carries at least one side: a `server_id` once the backend
/// has accepted it, a `client_token` when it was created locally before any
/// network call, or both after a successful send has been reconciled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIdentity {
    pub server_id: Option<String>,
    pub client_token: Option<String>,
}

impl MessageIdentity {
    pub fn from_server(server_id: impl Into<String>) -> Self {
        MessageIdentity {
            server_id: Some(server_id.into()),
            client_token: None,
        }
    }

    pub fn from_token(client_token: impl Into<String>) -> Self {
        MessageIdentity {
            server_id: None,
            client_token: Some(client_token.into()),
        }
    }

    /// Generate a fresh, globally unique client token for an optimistic write.
    pub fn new_client_token() -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageKind {
    /// Preview label used in place of the body for pure-media messages.
    pub fn placeholder_label(&self) -> &'static str {
        match self {
            MessageKind::Text => "",
            MessageKind::Image => "[Image]",
            MessageKind::Video => "[Video]",
            MessageKind::Audio => "[Audio]",
            MessageKind::Document => "[Document]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    Pending,   // Staged locally, not yet acknowledged by the server
    Sent,      // Accepted by the server
    Delivered, // Delivered to the recipient's device
    Read,      // Read by the recipient
    Failed,    // Send failed; kept visible until explicit discard
}

/// Reference from a message to the media job tracking its binary attachment.
///
/// The wire record carries enough metadata to seed the job; the async
/// lifecycle itself lives in the media job tracker, not on the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub job_id: JobId,
    pub remote_url: Option<String>,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// A single communication unit in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub identity: MessageIdentity,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    pub body: String,
    pub kind: MessageKind,
    pub attachment: Option<MediaRef>,
    pub delivery_state: DeliveryState,
    /// Logical timestamp (milliseconds) used for chronological ordering.
    pub sent_at: i64,
}

impl Message {
    /// Preview text for this message: the body, or a kind placeholder when
    /// the message is pure media.
    pub fn preview(&self) -> String {
        if self.body.is_empty() {
            self.kind.placeholder_label().to_string()
        } else {
            self.body.clone()
        }
    }
}

/// Denormalized per-conversation fields derived from the message cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub last_message_preview: String,
    pub last_message_at: Option<i64>,
    pub unread_count: u32,
}

/// The tracked async lifecycle of one binary attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJob {
    pub job_id: JobId,
    pub owner: MessageIdentity,
    pub state: MediaJobState,
    pub remote_url: Option<String>,
    pub error: Option<String>,
    pub size_bytes: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaJobState {
    Pending,
    Ready,
    Failed,
}

/// A push-delivered insert/update notification for a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub op: LiveOp,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveOp {
    Insert,
    Update,
}

/// One page of historical messages, chronological (oldest first).
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub messages: Vec<Message>,
    /// Whether more older history may exist. A short page signals exhaustion.
    pub has_more: bool,
}

impl Page {
    pub fn empty() -> Self {
        Page {
            messages: Vec::new(),
            has_more: false,
        }
    }
}

/// Raw binary payload attached to an outbound send.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Content of a user-initiated send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendContent {
    pub body: String,
    pub kind: MessageKind,
    pub media: Option<MediaPayload>,
}

impl SendContent {
    pub fn text(body: impl Into<String>) -> Self {
        SendContent {
            body: body.into(),
            kind: MessageKind::Text,
            media: None,
        }
    }

    /// True when the send carries media and no text at all, in which case an
    /// upload failure aborts the whole send.
    pub fn is_media_only(&self) -> bool {
        self.media.is_some() && self.body.is_empty()
    }
}

/// Terminal state of one send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The server accepted the message and assigned it an id.
    Sent { server_id: String },
    /// The remote send failed; the staged message is kept with
    /// `DeliveryState::Failed` until explicitly discarded.
    Failed { error: crate::gateway::SendError },
    /// A media-only send was aborted because the upload failed.
    MediaFailed { job_id: JobId, detail: String },
}
