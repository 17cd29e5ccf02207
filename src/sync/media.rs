// Media job tracking.
//
// The binary side of a message lives its own async life: an attachment from
// history may still be resolving, an outbound upload may fail while the text
// goes through. Jobs are keyed independently of message text state and only
// ever retried on explicit request; the engine never retries a flaky asset
// store on its own.

use anyhow::{anyhow, Result};
use log::{debug, warn};

use crate::models::{
    ConversationId, MediaJob, MediaJobState, MediaPayload, MediaRef, Message,
};

use super::cache::Mutation;
use super::SyncEngine;

/// Internal tracker entry. Outbound jobs retain the raw payload and their
/// blob-storage key (the owning message's client token) so a retry can
/// re-upload under the same key.
pub(crate) struct TrackedJob {
    pub(crate) job: MediaJob,
    pub(crate) conversation_id: ConversationId,
    pub(crate) upload_key: Option<String>,
    pub(crate) payload: Option<MediaPayload>,
    pub(crate) in_flight: bool,
}

pub(crate) enum UploadResult {
    Ready(String),
    Failed(String),
    /// Nothing to do: unknown job, already in flight, or no retained payload.
    Skipped,
}

impl SyncEngine {
    /// Track the media job referenced by a message arriving from history or
    /// the live feed. A job whose wire record already carries a resolved URL
    /// starts ready; otherwise it starts pending. A later event carrying the
    /// URL moves a pending job to ready.
    pub async fn ensure_tracked(&self, message: &Message) {
        let Some(att) = &message.attachment else {
            return;
        };
        let mut jobs = self.media_jobs.lock().await;
        match jobs.get_mut(&att.job_id) {
            Some(entry) => {
                if entry.job.state == MediaJobState::Pending && att.remote_url.is_some() {
                    entry.job.state = MediaJobState::Ready;
                    entry.job.remote_url = att.remote_url.clone();
                    entry.job.error = None;
                }
            }
            None => {
                let state = if att.remote_url.is_some() {
                    MediaJobState::Ready
                } else {
                    MediaJobState::Pending
                };
                jobs.insert(
                    att.job_id.clone(),
                    TrackedJob {
                        job: MediaJob {
                            job_id: att.job_id.clone(),
                            owner: message.identity.clone(),
                            state,
                            remote_url: att.remote_url.clone(),
                            error: None,
                            size_bytes: att.size_bytes,
                            mime_type: att.mime_type.clone(),
                        },
                        conversation_id: message.conversation_id.clone(),
                        upload_key: None,
                        payload: None,
                        in_flight: false,
                    },
                );
            }
        }
    }

    /// Current state of a media job, if tracked.
    pub async fn observe_media(&self, job_id: &str) -> Option<MediaJob> {
        let jobs = self.media_jobs.lock().await;
        jobs.get(job_id).map(|entry| entry.job.clone())
    }

    /// Explicitly retry a failed (or stuck) media job. Concurrent retries of
    /// the same job collapse into the one in-flight attempt.
    pub async fn retry_media(&self, job_id: &str) -> Result<()> {
        {
            let mut jobs = self.media_jobs.lock().await;
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| anyhow!("unknown media job {}", job_id))?;
            if entry.in_flight {
                debug!("retry of media job {} collapsed into in-flight attempt", job_id);
                return Ok(());
            }
            entry.job.state = MediaJobState::Pending;
            entry.job.error = None;
            if entry.payload.is_none() {
                // Inbound job with no retained payload: nothing to re-run
                // locally, the URL has to arrive through a live update.
                debug!("media job {} reset to pending, awaiting remote availability", job_id);
                return Ok(());
            }
        }
        if let UploadResult::Failed(detail) = self.run_upload_job(job_id).await {
            warn!("retried upload for media job {} failed: {}", job_id, detail);
        }
        Ok(())
    }

    /// Register the media job for a freshly staged outbound message.
    pub(crate) async fn track_outbound(
        &self,
        staged: &Message,
        att: &MediaRef,
        payload: MediaPayload,
        upload_key: &str,
    ) {
        let mut jobs = self.media_jobs.lock().await;
        jobs.insert(
            att.job_id.clone(),
            TrackedJob {
                job: MediaJob {
                    job_id: att.job_id.clone(),
                    owner: staged.identity.clone(),
                    state: MediaJobState::Pending,
                    remote_url: None,
                    error: None,
                    size_bytes: att.size_bytes,
                    mime_type: att.mime_type.clone(),
                },
                conversation_id: staged.conversation_id.clone(),
                upload_key: Some(upload_key.to_string()),
                payload: Some(payload),
                in_flight: false,
            },
        );
    }

    /// Run (or re-run) the upload for an outbound job, reflecting the
    /// resulting URL onto the cached message. A job that is already ready
    /// short-circuits with its URL; a job already in flight is skipped.
    pub(crate) async fn run_upload_job(&self, job_id: &str) -> UploadResult {
        let (key, bytes, mime_type) = {
            let mut jobs = self.media_jobs.lock().await;
            let Some(entry) = jobs.get_mut(job_id) else {
                return UploadResult::Skipped;
            };
            if entry.in_flight {
                return UploadResult::Skipped;
            }
            if entry.job.state == MediaJobState::Ready {
                if let Some(url) = &entry.job.remote_url {
                    return UploadResult::Ready(url.clone());
                }
            }
            let (Some(key), Some(payload)) = (&entry.upload_key, &entry.payload) else {
                return UploadResult::Skipped;
            };
            entry.in_flight = true;
            entry.job.state = MediaJobState::Pending;
            entry.job.error = None;
            (key.clone(), payload.bytes.clone(), payload.mime_type.clone())
        };

        let outcome = self.gateway.upload(&key, &bytes, &mime_type).await;

        let result = {
            let mut jobs = self.media_jobs.lock().await;
            let Some(entry) = jobs.get_mut(job_id) else {
                return UploadResult::Skipped;
            };
            entry.in_flight = false;
            match outcome {
                Ok(url) => {
                    entry.job.state = MediaJobState::Ready;
                    entry.job.remote_url = Some(url.clone());
                    Some((entry.conversation_id.clone(), url))
                }
                Err(e) => {
                    entry.job.state = MediaJobState::Failed;
                    entry.job.error = Some(e.to_string());
                    None
                }
            }
        };

        match result {
            Some((conversation_id, url)) => {
                if let Some(conv) = self.conversation(&conversation_id).await {
                    self.apply_mutation(
                        &conv,
                        Mutation::SetAttachmentUrl {
                            client_token: key,
                            url: url.clone(),
                        },
                    )
                    .await;
                }
                UploadResult::Ready(url)
            }
            None => {
                let jobs = self.media_jobs.lock().await;
                let detail = jobs
                    .get(job_id)
                    .and_then(|e| e.job.error.clone())
                    .unwrap_or_else(|| "upload failed".to_string());
                UploadResult::Failed(detail)
            }
        }
    }
}
