// Live event merging.
//
// The live feed delivers insert/update events at least once, best-effort
// ordered. Merging never blocks on I/O: each event is turned into one cache
// mutation and applied directly, so the layer can keep up with the feed even
// while a slow page load or send holds the conversation's turn.

use futures_util::StreamExt;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::models::{ConversationId, LiveEvent};

use super::cache::Mutation;
use super::SyncEngine;

impl SyncEngine {
    /// Merge one live event into a conversation's cache.
    ///
    /// Inserts that resolve against an already-cached identity are treated
    /// as updates (duplicate delivery, or an event racing an optimistic
    /// write); updates with no cached counterpart are treated as inserts
    /// (update-before-insert ordering from the transport). Events for
    /// conversations the engine has not opened are dropped, not errors.
    pub async fn apply_event(&self, conversation_id: &str, event: LiveEvent) {
        let Some(conv) = self.conversation(conversation_id).await else {
            debug!(
                "dropping live event for unknown conversation {}",
                conversation_id
            );
            return;
        };

        let active = self.is_active(conversation_id).await;
        self.ensure_tracked(&event.message).await;
        self.apply_mutation(
            &conv,
            Mutation::MergeEvent {
                op: event.op,
                message: event.message,
                active,
            },
        )
        .await;
    }

    /// Drain a live event channel until the feed closes.
    pub async fn run_event_loop(&self, receiver: mpsc::Receiver<(ConversationId, LiveEvent)>) {
        let mut events = ReceiverStream::new(receiver);
        while let Some((conversation_id, event)) = events.next().await {
            self.apply_event(&conversation_id, event).await;
        }
        info!("live event feed closed");
    }
}
