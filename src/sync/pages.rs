// Cursor-paginated history loading.
//
// The page store owns the "load older" boundary: the oldest loaded
// timestamp, moving backward only. Pages arrive newest-first over the wire
// and are reversed to chronological before merging; merging only ever
// prepends relative to already-cached newer messages.

use std::sync::atomic::Ordering;

use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::models::{Message, Page};

use super::cache::Mutation;
use super::SyncEngine;

impl SyncEngine {
    /// Load the next page of older history for a conversation.
    ///
    /// The first call (no boundary yet) returns the most recent `page_size`
    /// messages. A short page signals exhaustion: `has_more` turns false and
    /// further calls return an empty page without touching the gateway. A
    /// load whose conversation was navigated away mid-fetch is discarded and
    /// reports an empty page.
    pub async fn load_older(&self, conversation_id: &str) -> Result<Page> {
        let conv = self
            .conversation(conversation_id)
            .await
            .ok_or_else(|| anyhow!("conversation {} is not open", conversation_id))?;

        // Claim the conversation's turn before any I/O, so this page applies
        // in enqueue order relative to earlier-submitted intents.
        let _turn = conv.turn.lock().await;
        let generation = conv.generation.load(Ordering::SeqCst);

        let (older_than, exhausted) = {
            let snapshot = conv.snapshot.lock().await;
            (snapshot.oldest_loaded, snapshot.exhausted)
        };
        if exhausted {
            debug!("history for {} already exhausted", conversation_id);
            return Ok(Page::empty());
        }

        let fetched = self
            .gateway
            .fetch_messages(conversation_id, older_than, self.config.page_size)
            .await?;
        let has_more = fetched.len() == self.config.page_size;

        if conv.generation.load(Ordering::SeqCst) != generation {
            debug!(
                "discarding page for {}: conversation was navigated away mid-load",
                conversation_id
            );
            return Ok(Page::empty());
        }

        // Newest-first over the wire, chronological in the cache.
        let mut messages: Vec<Message> = fetched;
        messages.reverse();
        // The boundary is strict; drop anything at or past it even if the
        // gateway misbehaves.
        if let Some(boundary) = older_than {
            messages.retain(|m| m.sent_at < boundary);
        }

        for message in &messages {
            self.ensure_tracked(message).await;
        }
        self.apply_mutation(
            &conv,
            Mutation::PrependPage {
                messages: messages.clone(),
                has_more,
            },
        )
        .await;

        info!(
            "loaded {} older messages for {} (has_more={})",
            messages.len(),
            conversation_id,
            has_more
        );
        Ok(Page { messages, has_more })
    }
}
