// Conversation summary projection and read state.
//
// The summary is derived, never independently authored: it is recomputed
// from the current snapshot on demand. The one exception is an externally
// seeded summary (the conversation list often loads before any messages),
// which stays authoritative until the cache observes a newer message.

use anyhow::{anyhow, Result};
use log::debug;

use crate::models::ConversationSummary;

use super::cache::{ConversationSnapshot, Mutation};
use super::SyncEngine;

/// Project the summary from a snapshot.
pub fn project(snapshot: &ConversationSnapshot) -> ConversationSummary {
    let latest = snapshot.messages.last();
    if let Some(seed) = &snapshot.seeded {
        // Seed stays authoritative until the cache holds something newer
        if latest.map_or(true, |m| seed.last_at > m.sent_at) {
            return ConversationSummary {
                conversation_id: snapshot.conversation_id.clone(),
                last_message_preview: seed.preview.clone(),
                last_message_at: Some(seed.last_at),
                unread_count: snapshot.unread_count,
            };
        }
    }
    ConversationSummary {
        conversation_id: snapshot.conversation_id.clone(),
        last_message_preview: latest.map(|m| m.preview()).unwrap_or_default(),
        last_message_at: latest.map(|m| m.sent_at),
        unread_count: snapshot.unread_count,
    }
}

impl SyncEngine {
    /// Current summary for a conversation, if open.
    pub async fn summary(&self, conversation_id: &str) -> Option<ConversationSummary> {
        let snapshot = self.snapshot(conversation_id).await?;
        Some(project(&snapshot))
    }

    /// Install externally supplied summary fields (preview, timestamp,
    /// unread count) for a conversation, opening it if needed. These stay
    /// authoritative until the cache observes a newer message.
    pub async fn seed_summary(
        &self,
        conversation_id: &str,
        preview: impl Into<String>,
        last_at: i64,
        unread: u32,
    ) {
        self.open_conversation(conversation_id).await;
        if let Some(conv) = self.conversation(conversation_id).await {
            self.apply_mutation(
                &conv,
                Mutation::SeedSummary {
                    preview: preview.into(),
                    last_at,
                    unread,
                },
            )
            .await;
        }
    }

    /// Reset the local unread count. The remote read receipt is a separate
    /// protocol action and fires only when `send_receipt` is set; local
    /// read state and remote read receipts are deliberately not conflated,
    /// otherwise receipts would fire on every view.
    pub async fn mark_read(&self, conversation_id: &str, send_receipt: bool) -> Result<()> {
        let conv = self
            .conversation(conversation_id)
            .await
            .ok_or_else(|| anyhow!("conversation {} is not open", conversation_id))?;
        self.apply_mutation(&conv, Mutation::MarkRead).await;
        debug!("marked {} read (receipt={})", conversation_id, send_receipt);
        if send_receipt {
            self.gateway.mark_read_remote(conversation_id).await?;
        }
        Ok(())
    }
}
