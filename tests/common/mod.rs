// Common test utilities for integration tests
// This module contains shared code for all integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::LevelFilter;
use tokio::sync::Mutex as TokioMutex;

use chatsync::gateway::{MessageGateway, SendAck, SendError};
use chatsync::models::{
    DeliveryState, Direction, MediaRef, Message, MessageIdentity, MessageKind, SendContent,
};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Build an inbound history/live message with a server id.
pub fn inbound(conversation_id: &str, server_id: &str, body: &str, sent_at: i64) -> Message {
    Message {
        identity: MessageIdentity::from_server(server_id),
        conversation_id: conversation_id.to_string(),
        direction: Direction::Inbound,
        body: body.to_string(),
        kind: MessageKind::Text,
        attachment: None,
        delivery_state: DeliveryState::Delivered,
        sent_at,
    }
}

/// Same as `inbound` but carrying a media reference.
pub fn inbound_with_media(
    conversation_id: &str,
    server_id: &str,
    job_id: &str,
    remote_url: Option<&str>,
    sent_at: i64,
) -> Message {
    let mut message = inbound(conversation_id, server_id, "", sent_at);
    message.kind = MessageKind::Image;
    message.attachment = Some(MediaRef {
        job_id: job_id.to_string(),
        remote_url: remote_url.map(|s| s.to_string()),
        mime_type: "image/png".to_string(),
        size_bytes: 3,
    });
    message
}

/// In-memory gateway with scripted behavior.
///
/// History is held chronologically per conversation; fetches slice it the
/// way a real backend would (newest-first, strictly older than the cursor).
/// Send and upload outcomes can be queued; when the queues are empty, calls
/// succeed with generated values. All calls are recorded for assertions.
pub struct MockGateway {
    history: TokioMutex<HashMap<String, Vec<Message>>>,
    send_results: TokioMutex<VecDeque<std::result::Result<SendAck, SendError>>>,
    upload_results: TokioMutex<VecDeque<std::result::Result<String, String>>>,
    pub sent: TokioMutex<Vec<(String, SendContent, String)>>,
    pub uploads: TokioMutex<Vec<(String, usize, String)>>,
    pub read_receipts: TokioMutex<Vec<String>>,
    /// Order of gateway calls, for enqueue-order assertions.
    pub op_log: TokioMutex<Vec<&'static str>>,
    pub fetch_calls: AtomicUsize,
    fetch_delay: TokioMutex<Option<Duration>>,
    send_delay: TokioMutex<Option<Duration>>,
    ack_counter: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        MockGateway {
            history: TokioMutex::new(HashMap::new()),
            send_results: TokioMutex::new(VecDeque::new()),
            upload_results: TokioMutex::new(VecDeque::new()),
            sent: TokioMutex::new(Vec::new()),
            uploads: TokioMutex::new(Vec::new()),
            read_receipts: TokioMutex::new(Vec::new()),
            op_log: TokioMutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            fetch_delay: TokioMutex::new(None),
            send_delay: TokioMutex::new(None),
            ack_counter: AtomicUsize::new(0),
        }
    }

    pub async fn seed_history(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut history = self.history.lock().await;
        let entry = history.entry(conversation_id.to_string()).or_default();
        entry.extend(messages);
        entry.sort_by_key(|m| m.sent_at);
    }

    pub async fn queue_send_result(&self, result: std::result::Result<SendAck, SendError>) {
        self.send_results.lock().await.push_back(result);
    }

    pub async fn queue_upload_result(&self, result: std::result::Result<String, String>) {
        self.upload_results.lock().await.push_back(result);
    }

    pub async fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().await = Some(delay);
    }

    pub async fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().await = Some(delay);
    }
}

#[async_trait]
impl MessageGateway for MockGateway {
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        older_than: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.op_log.lock().await.push("fetch_messages");
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let history = self.history.lock().await;
        let mut matching: Vec<Message> = history
            .get(conversation_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| older_than.map(|b| m.sent_at < b).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Newest-first over the wire
        matching.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn send_remote(
        &self,
        conversation_id: &str,
        content: &SendContent,
        client_token: &str,
    ) -> std::result::Result<SendAck, SendError> {
        self.op_log.lock().await.push("send_remote");
        let delay = *self.send_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().await.push((
            conversation_id.to_string(),
            content.clone(),
            client_token.to_string(),
        ));

        if let Some(result) = self.send_results.lock().await.pop_front() {
            return result;
        }
        let n = self.ack_counter.fetch_add(1, Ordering::SeqCst);
        Ok(SendAck {
            server_id: format!("srv-ack-{}", n),
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    async fn upload(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<String> {
        self.op_log.lock().await.push("upload");
        self.uploads
            .lock()
            .await
            .push((key.to_string(), bytes.len(), mime_type.to_string()));

        if let Some(result) = self.upload_results.lock().await.pop_front() {
            return result.map_err(|detail| anyhow!(detail));
        }
        Ok(format!("https://blobs.test/{}", key))
    }

    async fn mark_read_remote(&self, conversation_id: &str) -> Result<()> {
        self.op_log.lock().await.push("mark_read_remote");
        self.read_receipts
            .lock()
            .await
            .push(conversation_id.to_string());
        Ok(())
    }
}
