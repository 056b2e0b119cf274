use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{ApiError, BridgeClient, ChatPayload, MessagePayload};
use crate::media::MediaResolver;
use crate::models::{
    AckLevel, Attachment, ChatFilter, ChatSummary, Direction, MediaKind, Message, sort_messages,
};

const MESSAGE_PAGE_SIZE: u32 = 100;
const READ_RESYNC_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),
}

#[derive(Default)]
struct Store {
    chats: Vec<ChatSummary>,
    messages: HashMap<String, Vec<Message>>,
}

/// Local mirror of the gateway's chat list and per-chat history.
///
/// The gateway stays the source of truth: every sync call replaces the
/// affected cache wholesale, and the engine is the sole writer. Filters are
/// applied on read and never touch stored data.
#[derive(Clone)]
pub struct ChatSyncEngine {
    api: BridgeClient,
    resolver: Arc<MediaResolver>,
    store: Arc<Mutex<Store>>,
}

impl ChatSyncEngine {
    pub fn new(api: BridgeClient, resolver: Arc<MediaResolver>) -> Self {
        Self {
            api,
            resolver,
            store: Arc::new(Mutex::new(Store::default())),
        }
    }

    /// Full replacement of the chat list from the gateway.
    pub async fn load_chats(&self) -> Result<Vec<ChatSummary>, SyncError> {
        let payloads = self.api.list_chats().await?;
        let chats: Vec<ChatSummary> = payloads.into_iter().map(chat_from_payload).collect();
        debug!(count = chats.len(), "chat list replaced");
        self.store.lock().expect("store lock poisoned").chats = chats.clone();
        Ok(chats)
    }

    /// Fetch history for one chat, resolve attachments, sort ascending by
    /// timestamp and replace that chat's cache.
    pub async fn load_messages(&self, chat_id: &str) -> Result<Vec<Message>, SyncError> {
        let payloads = self.api.list_messages(chat_id, MESSAGE_PAGE_SIZE).await?;
        let messages = messages_from_payloads(payloads, chat_id, &self.resolver);
        self.store
            .lock()
            .expect("store lock poisoned")
            .messages
            .insert(chat_id.to_string(), messages.clone());
        Ok(messages)
    }

    /// Optimistic: the local unread counter is zeroed before the gateway
    /// call. On failure the chat list is re-synced shortly after instead of
    /// rolling the counter back.
    pub async fn mark_read(&self, chat_id: &str) {
        self.zero_unread(chat_id);
        if let Err(error) = self.api.mark_read(chat_id).await {
            warn!(chat_id, %error, "mark-read failed, scheduling chat resync");
            let engine = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(READ_RESYNC_DELAY).await;
                if let Err(error) = engine.load_chats().await {
                    warn!(%error, "chat resync after mark-read failure also failed");
                }
            });
        }
    }

    pub fn chats(&self, filter: &ChatFilter) -> Vec<ChatSummary> {
        self.store
            .lock()
            .expect("store lock poisoned")
            .chats
            .iter()
            .filter(|chat| filter.matches(chat))
            .cloned()
            .collect()
    }

    pub fn messages(&self, chat_id: &str) -> Vec<Message> {
        self.store
            .lock()
            .expect("store lock poisoned")
            .messages
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn unread_count(&self, chat_id: &str) -> Option<u32> {
        self.store
            .lock()
            .expect("store lock poisoned")
            .chats
            .iter()
            .find(|chat| chat.id == chat_id)
            .map(|chat| chat.unread_count)
    }

    /// Append a locally synthesized message (the optimistic echo of a send).
    /// The next full resync for the chat replaces it with the gateway copy.
    pub(crate) fn append_local(&self, message: Message) {
        let mut store = self.store.lock().expect("store lock poisoned");
        let messages = store.messages.entry(message.chat_id.clone()).or_default();
        messages.push(message);
        sort_messages(messages);
    }

    fn zero_unread(&self, chat_id: &str) {
        let mut store = self.store.lock().expect("store lock poisoned");
        if let Some(chat) = store.chats.iter_mut().find(|chat| chat.id == chat_id) {
            chat.unread_count = 0;
        }
    }

    #[cfg(test)]
    pub(crate) fn seed_chats(&self, chats: Vec<ChatSummary>) {
        self.store.lock().expect("store lock poisoned").chats = chats;
    }

    #[cfg(test)]
    pub(crate) fn zero_unread_for_test(&self, chat_id: &str) {
        self.zero_unread(chat_id);
    }

    #[cfg(test)]
    pub(crate) fn replace_messages_for_test(&self, chat_id: &str, payloads: Vec<MessagePayload>) {
        let messages = messages_from_payloads(payloads, chat_id, &self.resolver);
        self.store
            .lock()
            .expect("store lock poisoned")
            .messages
            .insert(chat_id.to_string(), messages);
    }
}

fn chat_from_payload(payload: ChatPayload) -> ChatSummary {
    let is_group = payload
        .is_group
        .unwrap_or_else(|| payload.id.ends_with("@g.us"));
    let name = payload.name.clone().unwrap_or_else(|| payload.id.clone());
    ChatSummary {
        id: payload.id,
        name,
        is_group,
        unread_count: payload.unread_count.unwrap_or(0),
        last_activity: payload.conversation_timestamp,
    }
}

fn messages_from_payloads(
    payloads: Vec<MessagePayload>,
    chat_id: &str,
    resolver: &MediaResolver,
) -> Vec<Message> {
    let mut messages: Vec<Message> = payloads
        .into_iter()
        .map(|payload| message_from_payload(payload, chat_id, resolver))
        .collect();
    sort_messages(&mut messages);
    messages
}

fn message_from_payload(
    payload: MessagePayload,
    chat_id: &str,
    resolver: &MediaResolver,
) -> Message {
    let direction = if payload.from_me.unwrap_or(false) {
        Direction::Outgoing
    } else {
        Direction::Incoming
    };
    let ack = match direction {
        Direction::Outgoing => Some(ack_from_wire(payload.ack)),
        Direction::Incoming => None,
    };
    let attachment = payload.media.as_ref().and_then(|media| {
        let raw_url = media.url.clone()?;
        let kind = match (media.mimetype.as_deref(), media.filename.as_deref()) {
            (Some(mime), _) => MediaKind::from_mime(mime),
            (None, Some(name)) => MediaKind::from_file_name(name),
            (None, None) => MediaKind::Other,
        };
        Some(Attachment {
            kind,
            url: resolver.resolve(&raw_url),
            raw_url,
            mime_type: media.mimetype.clone(),
        })
    });
    Message {
        id: payload.id,
        chat_id: chat_id.to_string(),
        direction,
        body: payload.body,
        attachment,
        timestamp: payload.timestamp,
        ack,
    }
}

/// Wire ack levels: 3 and above means read (4 is "played" for voice notes),
/// 2 means delivered to the device, anything else is merely sent.
fn ack_from_wire(ack: Option<i32>) -> AckLevel {
    match ack {
        Some(level) if level >= 3 => AckLevel::Read,
        Some(2) => AckLevel::Delivered,
        _ => AckLevel::Sent,
    }
}
