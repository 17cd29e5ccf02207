// The per-conversation message cache: an immutable snapshot plus the pure
// mutation application that produces the next snapshot.
//
// Every cache change (page merges, live-event merges, optimistic writes)
// goes through `apply(&snapshot, mutation)`, which returns a brand new value.
// The engine swaps the new snapshot in under a short lock; nothing here does
// I/O, so every intermediate state is observable.

use log::debug;

use crate::models::{
    ConversationId, DeliveryState, Direction, LiveOp, Message,
};

use super::identity;

/// Externally supplied summary fields, authoritative until the cache observes
/// a newer message (the latest page may simply not be loaded yet).
#[derive(Debug, Clone, PartialEq)]
pub struct SeededSummary {
    pub preview: String,
    pub last_at: i64,
}

/// Immutable state of one conversation's cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    /// Chronological, oldest first, unique by resolved identity.
    pub messages: Vec<Message>,
    /// Page cursor: the oldest loaded `sent_at`. Moves backward only.
    pub oldest_loaded: Option<i64>,
    /// Whether older history is known to be exhausted.
    pub exhausted: bool,
    pub unread_count: u32,
    pub seeded: Option<SeededSummary>,
}

impl ConversationSnapshot {
    pub fn new(conversation_id: impl Into<ConversationId>) -> Self {
        ConversationSnapshot {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            oldest_loaded: None,
            exhausted: false,
            unread_count: 0,
            seeded: None,
        }
    }
}

/// One cache mutation. Live-event mutations are idempotent: applying the
/// same one twice is a no-op the second time.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Merge a chronological page of strictly-older history.
    PrependPage {
        messages: Vec<Message>,
        has_more: bool,
    },
    /// Merge a live insert/update event. `active` is whether the
    /// conversation is currently the focused one (controls unread counting).
    MergeEvent {
        op: LiveOp,
        message: Message,
        active: bool,
    },
    /// Stage an optimistic write before any network call.
    Stage { message: Message },
    /// Adopt the server acknowledgment onto a staged record.
    Reconcile {
        client_token: String,
        server_id: String,
        server_ts: i64,
    },
    /// Mark a staged record as failed, keeping it visible.
    MarkFailed { client_token: String },
    /// Reset a staged record to pending for a retry attempt.
    ResetPending { client_token: String },
    /// Remove a staged record explicitly.
    Discard { client_token: String },
    /// Record the uploaded URL on a staged record's attachment.
    SetAttachmentUrl { client_token: String, url: String },
    /// Zero the unread count.
    MarkRead,
    /// Install externally supplied summary fields.
    SeedSummary {
        preview: String,
        last_at: i64,
        unread: u32,
    },
}

/// Delivery states form a one-way ladder for merge purposes: a merge never
/// moves a message backward from Delivered to Sent because a stale update
/// arrived late. Pending and Failed sit at the bottom.
fn delivery_rank(state: DeliveryState) -> u8 {
    match state {
        DeliveryState::Pending | DeliveryState::Failed => 0,
        DeliveryState::Sent => 1,
        DeliveryState::Delivered => 2,
        DeliveryState::Read => 3,
    }
}

/// Insert `message` at its chronological position. Ties on `sent_at` keep
/// earlier-inserted messages first.
fn insert_chronological(messages: &mut Vec<Message>, message: Message) {
    if messages.is_empty() {
        messages.push(message);
        return;
    }
    // Fast paths for the common cases: newest at the tail, oldest at the head
    if message.sent_at >= messages.last().map(|m| m.sent_at).unwrap_or(i64::MIN) {
        messages.push(message);
    } else if message.sent_at < messages.first().map(|m| m.sent_at).unwrap_or(i64::MAX) {
        messages.insert(0, message);
    } else {
        let idx = messages.partition_point(|m| m.sent_at <= message.sent_at);
        messages.insert(idx, message);
    }
}

/// Merge an incoming record into the cached one at `idx`, repositioning if
/// the timestamp was corrected. Exactly one representation survives.
fn merge_into(messages: &mut Vec<Message>, idx: usize, incoming: &Message) {
    let mut merged = messages.remove(idx);

    // Union of identity halves. The records matched, so any side both carry
    // is already equal.
    if merged.identity.server_id.is_none() {
        merged.identity.server_id = incoming.identity.server_id.clone();
    }
    if merged.identity.client_token.is_none() {
        merged.identity.client_token = incoming.identity.client_token.clone();
    }

    // Delivery state only moves forward; a failed local record defers to
    // whatever the server reports.
    if delivery_rank(incoming.delivery_state) > delivery_rank(merged.delivery_state)
        || merged.delivery_state == DeliveryState::Failed
    {
        merged.delivery_state = incoming.delivery_state;
    }

    // Corrected content
    if !incoming.body.is_empty() {
        merged.body = incoming.body.clone();
    }

    // Attachment readiness: adopt a resolved URL, or the whole reference if
    // we had none.
    match (&mut merged.attachment, &incoming.attachment) {
        (Some(existing), Some(incoming_ref)) => {
            if existing.remote_url.is_none() && incoming_ref.remote_url.is_some() {
                existing.remote_url = incoming_ref.remote_url.clone();
            }
        }
        (None, Some(incoming_ref)) => {
            merged.attachment = Some(incoming_ref.clone());
        }
        _ => {}
    }

    // Monotonicity guard: a corrected timestamp is adopted only when it does
    // not move the message backward in time.
    if incoming.sent_at >= merged.sent_at {
        merged.sent_at = incoming.sent_at;
    }

    insert_chronological(messages, merged);
}

/// Apply one mutation, producing the next snapshot.
pub fn apply(prev: &ConversationSnapshot, mutation: Mutation) -> ConversationSnapshot {
    let mut next = prev.clone();

    match mutation {
        Mutation::PrependPage { messages, has_more } => {
            for message in messages {
                // A page never disturbs newer cached messages: anything the
                // cache already resolves is skipped outright.
                if identity::find_match(&next.messages, &message.identity).is_some() {
                    continue;
                }
                let ts = message.sent_at;
                insert_chronological(&mut next.messages, message);
                next.oldest_loaded = Some(match next.oldest_loaded {
                    Some(boundary) => boundary.min(ts),
                    None => ts,
                });
            }
            if !has_more {
                next.exhausted = true;
            }
        }
        Mutation::MergeEvent {
            op,
            message,
            active,
        } => match identity::find_match(&next.messages, &message.identity) {
            Some(idx) => {
                // Duplicate delivery, or an insert for a message the outbox
                // already staged: either way this is an update.
                merge_into(&mut next.messages, idx, &message);
            }
            None => {
                if op == LiveOp::Update {
                    debug!(
                        "update for unknown message in {} treated as insert",
                        next.conversation_id
                    );
                }
                let inbound = message.direction == Direction::Inbound;
                insert_chronological(&mut next.messages, message);
                if inbound && !active {
                    next.unread_count += 1;
                }
            }
        },
        Mutation::Stage { message } => {
            if identity::find_match(&next.messages, &message.identity).is_none() {
                insert_chronological(&mut next.messages, message);
            }
        }
        Mutation::Reconcile {
            client_token,
            server_id,
            server_ts,
        } => {
            if let Some(idx) = identity::find_by_token(&next.messages, &client_token) {
                let mut msg = next.messages.remove(idx);
                // The client token is retained so an in-flight duplicate
                // live event can still resolve against this record.
                msg.identity.server_id = Some(server_id);
                if delivery_rank(msg.delivery_state) < delivery_rank(DeliveryState::Sent) {
                    msg.delivery_state = DeliveryState::Sent;
                }
                if server_ts >= msg.sent_at {
                    msg.sent_at = server_ts;
                }
                insert_chronological(&mut next.messages, msg);
            }
        }
        Mutation::MarkFailed { client_token } => {
            if let Some(idx) = identity::find_by_token(&next.messages, &client_token) {
                next.messages[idx].delivery_state = DeliveryState::Failed;
            }
        }
        Mutation::ResetPending { client_token } => {
            if let Some(idx) = identity::find_by_token(&next.messages, &client_token) {
                next.messages[idx].delivery_state = DeliveryState::Pending;
            }
        }
        Mutation::Discard { client_token } => {
            if let Some(idx) = identity::find_by_token(&next.messages, &client_token) {
                next.messages.remove(idx);
            }
        }
        Mutation::SetAttachmentUrl { client_token, url } => {
            if let Some(idx) = identity::find_by_token(&next.messages, &client_token) {
                if let Some(attachment) = next.messages[idx].attachment.as_mut() {
                    attachment.remote_url = Some(url);
                }
            }
        }
        Mutation::MarkRead => {
            next.unread_count = 0;
        }
        Mutation::SeedSummary {
            preview,
            last_at,
            unread,
        } => {
            next.seeded = Some(SeededSummary {
                preview,
                last_at,
            });
            next.unread_count = unread;
        }
    }

    next
}
