//! Local chat mirror: keeps conversations usable when the backend path is
//! down, and the glue that falls back to it on request failure.

use crate::api::{ApiClient, ApiError, ApiResult, ChatMessage, NewMessage};
use crate::storage::{KeyValueStore, StoreError};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_MAX_MESSAGES: usize = 200;
const SUMMARY_KEY: &str = "@local_chats";
/// Chat ids with this prefix exist only client-side; the backend assigns a
/// real id when the first message is delivered.
const SESSION_PREFIX: &str = "session-";

fn messages_key(chat_id: &str) -> String {
    format!("@chat_messages:{}", chat_id)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(rename = "fromAI")]
    pub from_ai: bool,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat_id: String,
    pub title: String,
    pub last_updated: i64,
    /// Populated on read for previews; not part of the stored index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<StoredMessage>,
}

/// Where a sent message ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered to the backend; carries the server-assigned chat id.
    Backend { chat_id: String },
    /// Backend unreachable or rejecting; parked in the local store.
    Local,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn summary_title(message: &StoredMessage) -> String {
    match &message.text {
        Some(text) if !text.trim().is_empty() => text.trim().chars().take(40).collect(),
        _ if message.image_uri.is_some() => "Photo".to_string(),
        _ => "Chat".to_string(),
    }
}

fn stored_from_wire(message: &ChatMessage) -> StoredMessage {
    let timestamp = chrono::DateTime::parse_from_rfc3339(&message.timestamp)
        .map(|t| t.timestamp_millis())
        .unwrap_or(0);
    StoredMessage {
        id: message.id.clone(),
        text: message.text.clone(),
        image_uri: message.image_uri.clone(),
        from_ai: message.from_ai,
        timestamp,
        sender_id: message.sender_id.clone(),
    }
}

#[derive(Clone)]
pub struct LocalChatStore {
    store: Arc<dyn KeyValueStore>,
}

impl LocalChatStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        LocalChatStore { store }
    }

    fn read_index(&self) -> Result<Vec<ChatSummary>, StoreError> {
        match self.store.get(SUMMARY_KEY) {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: SUMMARY_KEY.to_string(),
                source: e,
            }),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let key = messages_key(chat_id);
        match self.store.get(&key) {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key,
                source: e,
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Append and trim to the most recent `max_messages`. The message list and
    /// the summary index are written together.
    pub fn append_message(
        &self,
        chat_id: &str,
        message: &StoredMessage,
        max_messages: usize,
    ) -> Result<(), StoreError> {
        let mut messages = self.get_messages(chat_id)?;
        messages.push(message.clone());
        if messages.len() > max_messages {
            let excess = messages.len() - max_messages;
            messages.drain(..excess);
        }

        let mut index = self.read_index()?;
        match index.iter_mut().find(|s| s.chat_id == chat_id) {
            Some(summary) => summary.last_updated = message.timestamp,
            None => index.push(ChatSummary {
                chat_id: chat_id.to_string(),
                title: summary_title(message),
                last_updated: message.timestamp,
                first_message: None,
            }),
        }

        let key = messages_key(chat_id);
        let messages_raw = serde_json::to_string(&messages).map_err(|e| StoreError::Encode {
            key: key.clone(),
            source: e,
        })?;
        let index_raw = serde_json::to_string(&index).map_err(|e| StoreError::Encode {
            key: SUMMARY_KEY.to_string(),
            source: e,
        })?;
        self.store
            .set_many(&[(key.as_str(), messages_raw.as_str()), (SUMMARY_KEY, index_raw.as_str())]);
        Ok(())
    }

    /// Chat previews, most recently updated first, each carrying the chat's
    /// first stored message.
    pub fn get_summaries(&self) -> Result<Vec<ChatSummary>, StoreError> {
        let mut index = self.read_index()?;
        for summary in &mut index {
            summary.first_message = self.get_messages(&summary.chat_id)?.into_iter().next();
        }
        index.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(index)
    }

    pub fn clear(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut index = self.read_index()?;
        index.retain(|s| s.chat_id != chat_id);
        let index_raw = serde_json::to_string(&index).map_err(|e| StoreError::Encode {
            key: SUMMARY_KEY.to_string(),
            source: e,
        })?;
        self.store.remove(&messages_key(chat_id));
        self.store.set(SUMMARY_KEY, &index_raw);
        Ok(())
    }

    /// Replace the mirror for a chat with the backend's history.
    fn mirror(&self, chat_id: &str, messages: &[StoredMessage]) -> Result<(), StoreError> {
        let key = messages_key(chat_id);
        let messages_raw = serde_json::to_string(messages).map_err(|e| StoreError::Encode {
            key: key.clone(),
            source: e,
        })?;
        let mut index = self.read_index()?;
        let last_updated = messages.last().map(|m| m.timestamp).unwrap_or_else(now_ms);
        match index.iter_mut().find(|s| s.chat_id == chat_id) {
            Some(summary) => summary.last_updated = last_updated,
            None => index.push(ChatSummary {
                chat_id: chat_id.to_string(),
                title: messages.first().map(summary_title).unwrap_or_else(|| "Chat".to_string()),
                last_updated,
                first_message: None,
            }),
        }
        let index_raw = serde_json::to_string(&index).map_err(|e| StoreError::Encode {
            key: SUMMARY_KEY.to_string(),
            source: e,
        })?;
        self.store
            .set_many(&[(key.as_str(), messages_raw.as_str()), (SUMMARY_KEY, index_raw.as_str())]);
        Ok(())
    }
}

/// Read an image (local path or http(s) URI) fully, then encode it as a
/// base64 data URL. The conversion completes before any dependent request
/// is issued.
pub async fn image_to_base64(http: &reqwest::Client, uri: &str) -> ApiResult<String> {
    let bytes: Vec<u8> = if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = http
            .get(uri)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Http {
                status: response.status().as_u16(),
                message: format!("could not fetch image {}", uri),
            });
        }
        response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?
            .to_vec()
    } else {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::Body(format!("could not read image {}: {}", path, e)))?
    };
    let mime = if uri.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

/// Send a message through the backend, parking it locally when the backend
/// cannot take it. Image content is converted to base64 before the send.
pub async fn send_message(
    client: &ApiClient,
    local: &LocalChatStore,
    chat_id: &str,
    message: &StoredMessage,
) -> Result<Delivery, StoreError> {
    let image_payload = match &message.image_uri {
        Some(uri) => match image_to_base64(client.http(), uri).await {
            Ok(data) => Some(data),
            Err(e) => {
                log::warn!("image conversion failed ({}), storing message locally", e);
                local.append_message(chat_id, message, DEFAULT_MAX_MESSAGES)?;
                return Ok(Delivery::Local);
            }
        },
        None => None,
    };
    let outgoing = NewMessage {
        chat_id: if chat_id.starts_with(SESSION_PREFIX) {
            None
        } else {
            Some(chat_id.to_string())
        },
        sender_id: message.sender_id.clone(),
        text: message.text.clone(),
        image_uri: image_payload,
        from_ai: message.from_ai,
    };
    match client.add_message(&outgoing).await {
        Ok(chat) => Ok(Delivery::Backend { chat_id: chat.id }),
        Err(e) => {
            log::warn!("backend send failed ({}), storing message locally", e);
            local.append_message(chat_id, message, DEFAULT_MAX_MESSAGES)?;
            Ok(Delivery::Local)
        }
    }
}

/// Full history for a chat: backend first (refreshing the local mirror),
/// local mirror when the backend is unreachable.
pub async fn fetch_messages(
    client: &ApiClient,
    local: &LocalChatStore,
    chat_id: &str,
) -> Result<Vec<StoredMessage>, StoreError> {
    match client.get_chat_messages(chat_id).await {
        Ok(history) => {
            let messages: Vec<StoredMessage> =
                history.messages.iter().map(stored_from_wire).collect();
            local.mirror(chat_id, &messages)?;
            Ok(messages)
        }
        Err(e) => {
            log::warn!("backend history fetch failed ({}), using local mirror", e);
            local.get_messages(chat_id)
        }
    }
}

/// Recent chat previews: backend first, local summaries as the fallback.
pub async fn fetch_recent_chats(
    client: &ApiClient,
    local: &LocalChatStore,
) -> Result<Vec<ChatSummary>, StoreError> {
    match client.get_recent_chats().await {
        Ok(recent) => Ok(recent
            .iter()
            .map(|chat| ChatSummary {
                chat_id: chat.chat_id.clone(),
                title: chat.title.clone(),
                last_updated: chat
                    .last_updated
                    .as_deref()
                    .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(0),
                first_message: chat.first_message.as_ref().map(stored_from_wire),
            })
            .collect()),
        Err(e) => {
            log::warn!("backend chat list failed ({}), using local summaries", e);
            local.get_summaries()
        }
    }
}
