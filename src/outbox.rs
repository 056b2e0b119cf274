use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::api::{ApiError, BridgeClient};
use crate::models::{AckLevel, Direction, Message};
use crate::sync::ChatSyncEngine;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("nothing to send")]
    EmptyDraft,
    #[error("send failed: {0}")]
    Api(#[from] ApiError),
}

/// Outgoing text path with an optimistic local echo.
///
/// The draft buffer is cleared the moment a send begins so the input feels
/// responsive; on failure the text is put back verbatim for retry. On
/// success a synthesized outgoing message lands in the chat cache without
/// waiting for a resync — the next wholesale resync supersedes it.
pub struct MessageChannel {
    api: BridgeClient,
    sync: ChatSyncEngine,
    draft: Mutex<String>,
}

impl MessageChannel {
    pub fn new(api: BridgeClient, sync: ChatSyncEngine) -> Self {
        Self {
            api,
            sync,
            draft: Mutex::new(String::new()),
        }
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        *self.draft.lock().expect("draft lock poisoned") = text.into();
    }

    pub fn draft(&self) -> String {
        self.draft.lock().expect("draft lock poisoned").clone()
    }

    /// Send the current draft to `chat_id`. The draft is taken (cleared)
    /// up front and restored only if the gateway rejects the send.
    pub async fn send(&self, chat_id: &str) -> Result<Message, SendError> {
        let text = self.take_draft();
        if text.trim().is_empty() {
            return Err(SendError::EmptyDraft);
        }
        match self.send_text(chat_id, &text).await {
            Ok(message) => Ok(message),
            Err(error) => {
                self.restore_draft(text);
                Err(error)
            }
        }
    }

    /// Send arbitrary text, bypassing the draft buffer.
    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<Message, SendError> {
        let result = self.api.send_text(chat_id, text).await?;
        let id = result.id.unwrap_or_else(local_message_id);
        let message = local_echo(chat_id, text, id);
        debug!(chat_id, id = %message.id, "send accepted, echoing locally");
        self.sync.append_local(message.clone());
        Ok(message)
    }

    fn take_draft(&self) -> String {
        std::mem::take(&mut *self.draft.lock().expect("draft lock poisoned"))
    }

    fn restore_draft(&self, text: String) {
        *self.draft.lock().expect("draft lock poisoned") = text;
    }
}

fn local_echo(chat_id: &str, text: &str, id: String) -> Message {
    Message {
        id,
        chat_id: chat_id.to_string(),
        direction: Direction::Outgoing,
        body: Some(text.to_string()),
        attachment: None,
        timestamp: current_epoch_seconds(),
        ack: Some(AckLevel::Sent),
    }
}

fn local_message_id() -> String {
    format!("local-{:016x}", rand::thread_rng().next_u64())
}

fn current_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
