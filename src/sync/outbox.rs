// The optimistic write pipeline.
//
// A send is staged into the cache before any network call, so the UI shows
// the pending message immediately. The remote send then runs under the
// conversation's turn; on success the staged record adopts the server id
// (keeping its client token for any in-flight duplicate event to resolve
// against), on failure it is marked failed in place. A failed message is
// never removed silently: the user either retries it with the same token or
// discards it explicitly.

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::models::{
    DeliveryState, Direction, MediaRef, Message, MessageIdentity, SendContent, SendOutcome,
};

use super::cache::Mutation;
use super::media::UploadResult;
use super::{PendingSend, SyncEngine};

impl SyncEngine {
    /// Send a message, staging it optimistically first.
    pub async fn send(&self, conversation_id: &str, content: SendContent) -> Result<SendOutcome> {
        let conv = self
            .conversation(conversation_id)
            .await
            .ok_or_else(|| anyhow!("conversation {} is not open", conversation_id))?;

        let client_token = MessageIdentity::new_client_token();
        let attachment = content.media.as_ref().map(|media| MediaRef {
            job_id: Uuid::new_v4().to_string(),
            remote_url: None,
            mime_type: media.mime_type.clone(),
            size_bytes: media.bytes.len() as u64,
        });
        let staged = Message {
            identity: MessageIdentity::from_token(&client_token),
            conversation_id: conversation_id.to_string(),
            direction: Direction::Outbound,
            body: content.body.clone(),
            kind: content.kind,
            attachment: attachment.clone(),
            delivery_state: DeliveryState::Pending,
            sent_at: Utc::now().timestamp_millis(),
        };

        // Visible before any network call
        self.apply_mutation(
            &conv,
            Mutation::Stage {
                message: staged.clone(),
            },
        )
        .await;
        if let (Some(att), Some(media)) = (&attachment, &content.media) {
            self.track_outbound(&staged, att, media.clone(), &client_token)
                .await;
        }
        {
            let mut outbox = self.outbox.lock().await;
            outbox.insert(
                client_token.clone(),
                PendingSend {
                    conversation_id: conversation_id.to_string(),
                    content,
                },
            );
        }

        let _turn = conv.turn.lock().await;
        self.perform_send(&conv, conversation_id, &client_token)
            .await
    }

    /// Retry a failed send, reusing the original client token so a late
    /// live event for the first attempt still resolves correctly. The staged
    /// record shows `Pending` from the moment the retry's turn begins until
    /// its own outcome lands.
    pub async fn retry_send(
        &self,
        conversation_id: &str,
        client_token: &str,
    ) -> Result<SendOutcome> {
        let conv = self
            .conversation(conversation_id)
            .await
            .ok_or_else(|| anyhow!("conversation {} is not open", conversation_id))?;
        {
            let outbox = self.outbox.lock().await;
            let pending = outbox
                .get(client_token)
                .ok_or_else(|| anyhow!("no pending send for token {}", client_token))?;
            if pending.conversation_id != conversation_id {
                return Err(anyhow!(
                    "token {} belongs to conversation {}",
                    client_token,
                    pending.conversation_id
                ));
            }
        }

        // Reset only once the turn is ours: a retry queued behind the
        // still-in-flight first attempt must not flash Failed when that
        // attempt's failure lands.
        let _turn = conv.turn.lock().await;
        self.apply_mutation(
            &conv,
            Mutation::ResetPending {
                client_token: client_token.to_string(),
            },
        )
        .await;
        self.perform_send(&conv, conversation_id, client_token).await
    }

    /// Remove a staged (typically failed) message explicitly.
    pub async fn discard(&self, conversation_id: &str, client_token: &str) -> Result<bool> {
        let conv = self
            .conversation(conversation_id)
            .await
            .ok_or_else(|| anyhow!("conversation {} is not open", conversation_id))?;

        let before = conv.snapshot.lock().await.messages.len();
        let after = self
            .apply_mutation(
                &conv,
                Mutation::Discard {
                    client_token: client_token.to_string(),
                },
            )
            .await;
        let mut outbox = self.outbox.lock().await;
        outbox.remove(client_token);
        Ok(after.messages.len() < before)
    }

    /// Run the upload + remote-send steps for a staged message. Shared by
    /// `send` and `retry_send`; the caller holds the conversation's turn.
    async fn perform_send(
        &self,
        conv: &super::ConversationState,
        conversation_id: &str,
        client_token: &str,
    ) -> Result<SendOutcome> {
        let content = {
            let outbox = self.outbox.lock().await;
            outbox
                .get(client_token)
                .map(|p| p.content.clone())
                .ok_or_else(|| anyhow!("no pending send for token {}", client_token))?
        };

        // Media goes to durable storage first. A failed upload only aborts
        // the send when there is no text to fall back on.
        if content.media.is_some() {
            let job_id = {
                let snapshot = conv.snapshot.lock().await;
                super::identity::find_by_token(&snapshot.messages, client_token)
                    .and_then(|idx| snapshot.messages[idx].attachment.as_ref())
                    .map(|att| att.job_id.clone())
            };
            if let Some(job_id) = job_id {
                if let UploadResult::Failed(detail) = self.run_upload_job(&job_id).await {
                    warn!(
                        "media upload failed for send {} in {}: {}",
                        client_token, conversation_id, detail
                    );
                    if content.is_media_only() {
                        self.apply_mutation(
                            conv,
                            Mutation::MarkFailed {
                                client_token: client_token.to_string(),
                            },
                        )
                        .await;
                        return Ok(SendOutcome::MediaFailed { job_id, detail });
                    }
                    // Outbound text is still worth attempting
                }
            }
        }

        match self
            .gateway
            .send_remote(conversation_id, &content, client_token)
            .await
        {
            Ok(ack) => {
                self.apply_mutation(
                    conv,
                    Mutation::Reconcile {
                        client_token: client_token.to_string(),
                        server_id: ack.server_id.clone(),
                        server_ts: ack.timestamp,
                    },
                )
                .await;
                let mut outbox = self.outbox.lock().await;
                outbox.remove(client_token);
                info!(
                    "send {} in {} acknowledged as {}",
                    client_token, conversation_id, ack.server_id
                );
                Ok(SendOutcome::Sent {
                    server_id: ack.server_id,
                })
            }
            Err(error) => {
                // The record stays in the cache with a failure marker; the
                // pending content stays in the outbox for a retry.
                self.apply_mutation(
                    conv,
                    Mutation::MarkFailed {
                        client_token: client_token.to_string(),
                    },
                )
                .await;
                warn!(
                    "send {} in {} failed: {} (retryable={})",
                    client_token,
                    conversation_id,
                    error,
                    error.is_retryable()
                );
                Ok(SendOutcome::Failed { error })
            }
        }
    }
}
