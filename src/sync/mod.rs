// Conversation synchronization engine.
//
// This module is the entry point for the message sync core. It owns the
// authoritative in-memory cache per conversation; the UI, the live feed and
// the send pipeline all go through it. Submodules each cover one concern:
//
//   identity: canonical message identity resolution
//   cache:    immutable snapshots + pure mutation application
//   pages:    cursor-paginated history loading
//   live:     live insert/update event merging
//   outbox:   optimistic writes, reconciliation, retry, discard
//   summary:  derived per-conversation aggregates + read state
//   media:    async attachment lifecycle tracking

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex as TokioMutex;

use crate::gateway::MessageGateway;
use crate::models::{ConversationId, JobId, SendContent};

pub mod cache;
pub mod identity;
pub mod live;
pub mod media;
pub mod outbox;
pub mod pages;
pub mod summary;

pub use cache::{ConversationSnapshot, Mutation};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum messages fetched per history page.
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { page_size: 50 }
    }
}

/// Per-conversation mutable state held by the engine.
///
/// `snapshot` is the current immutable cache value; mutations replace it
/// wholesale. `turn` is the conversation's mutation queue: operations that
/// perform I/O (page loads, sends) claim it at submission, so their cache
/// effects apply in enqueue order rather than I/O completion order. The
/// tokio mutex is FIFO-fair, which is what makes the queue a queue.
/// `generation` is bumped when the UI navigates away, invalidating in-flight
/// page loads (never sends).
pub(crate) struct ConversationState {
    pub(crate) snapshot: TokioMutex<Arc<ConversationSnapshot>>,
    pub(crate) turn: TokioMutex<()>,
    pub(crate) generation: AtomicU64,
}

impl ConversationState {
    fn new(conversation_id: &str) -> Self {
        ConversationState {
            snapshot: TokioMutex::new(Arc::new(ConversationSnapshot::new(conversation_id))),
            turn: TokioMutex::new(()),
            generation: AtomicU64::new(0),
        }
    }
}

/// An optimistic write the engine may still need to replay (retry keeps the
/// original content and client token).
pub(crate) struct PendingSend {
    pub(crate) conversation_id: ConversationId,
    pub(crate) content: SendContent,
}

/// The conversation/message synchronization engine.
pub struct SyncEngine {
    pub(crate) gateway: Arc<dyn MessageGateway>,
    pub(crate) config: EngineConfig,
    pub(crate) conversations: TokioMutex<HashMap<ConversationId, Arc<ConversationState>>>,
    pub(crate) active: TokioMutex<Option<ConversationId>>,
    pub(crate) media_jobs: TokioMutex<HashMap<JobId, media::TrackedJob>>,
    pub(crate) outbox: TokioMutex<HashMap<String, PendingSend>>,
}

impl SyncEngine {
    pub fn new(gateway: Arc<dyn MessageGateway>) -> Self {
        Self::with_config(gateway, EngineConfig::default())
    }

    pub fn with_config(gateway: Arc<dyn MessageGateway>, config: EngineConfig) -> Self {
        SyncEngine {
            gateway,
            config,
            conversations: TokioMutex::new(HashMap::new()),
            active: TokioMutex::new(None),
            media_jobs: TokioMutex::new(HashMap::new()),
            outbox: TokioMutex::new(HashMap::new()),
        }
    }

    /// Register a conversation with the engine, creating an empty cache for
    /// it. Live events for unregistered conversations are dropped.
    pub async fn open_conversation(&self, conversation_id: &str) {
        let mut conversations = self.conversations.lock().await;
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(ConversationState::new(conversation_id)));
    }

    /// Drop a conversation's cache entirely. Any in-flight page load for it
    /// is implicitly discarded; in-flight sends still run to completion and
    /// simply find no cache to reconcile into.
    pub async fn close_conversation(&self, conversation_id: &str) {
        let removed = {
            let mut conversations = self.conversations.lock().await;
            conversations.remove(conversation_id)
        };
        if let Some(conv) = removed {
            conv.generation.fetch_add(1, Ordering::SeqCst);
            debug!("closed conversation {}", conversation_id);
        }
        let mut active = self.active.lock().await;
        if active.as_deref() == Some(conversation_id) {
            *active = None;
        }
    }

    /// Mark a conversation as the focused one (or none). Switching away from
    /// a conversation cancels its in-flight page loads: their results are
    /// discarded rather than applied. Sends are never cancelled.
    pub async fn set_active_conversation(&self, conversation_id: Option<&str>) {
        let previous = {
            let mut active = self.active.lock().await;
            std::mem::replace(&mut *active, conversation_id.map(|s| s.to_string()))
        };
        if let Some(prev) = previous {
            if conversation_id != Some(prev.as_str()) {
                if let Some(conv) = self.conversation(&prev).await {
                    conv.generation.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// Current immutable cache snapshot for a conversation, if open.
    pub async fn snapshot(&self, conversation_id: &str) -> Option<Arc<ConversationSnapshot>> {
        let conv = self.conversation(conversation_id).await?;
        let snapshot = conv.snapshot.lock().await;
        Some(snapshot.clone())
    }

    pub(crate) async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Option<Arc<ConversationState>> {
        let conversations = self.conversations.lock().await;
        conversations.get(conversation_id).cloned()
    }

    pub(crate) async fn is_active(&self, conversation_id: &str) -> bool {
        let active = self.active.lock().await;
        active.as_deref() == Some(conversation_id)
    }

    /// Apply one mutation to a conversation's cache, swapping in the new
    /// snapshot. The lock is held only for the pure application, never
    /// across I/O.
    pub(crate) async fn apply_mutation(
        &self,
        conv: &ConversationState,
        mutation: Mutation,
    ) -> Arc<ConversationSnapshot> {
        let mut snapshot = conv.snapshot.lock().await;
        let next = Arc::new(cache::apply(&snapshot, mutation));
        *snapshot = next.clone();
        next
    }
}
