use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::BotError;

/// One inbound update. `id` is the Bot API `update_id`.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum EventKind {
    Message(Message),
    CallbackQuery(CallbackQuery),
    /// Any update type we don't model, kept verbatim
    Other {
        kind: String,
        sender: Option<Sender>,
        payload: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawUser")]
pub struct Sender {
    pub id: i64,
    pub display_name: String,
    pub username: Option<String>,
}

#[derive(Deserialize)]
struct RawUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

impl From<RawUser> for Sender {
    fn from(raw: RawUser) -> Self {
        let mut display_name = raw.first_name;
        if display_name.is_empty() {
            display_name = raw.username.clone().unwrap_or_else(|| "User".to_string());
        }
        Sender {
            id: raw.id,
            display_name,
            username: raw.username,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct MessageRef {
    pub message_id: i64,
    pub chat: Chat,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Sender,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<MessageRef>,
}

#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

impl Event {
    /// Decode one element of a getUpdates `result` array.
    pub fn from_update(update: Value) -> Result<Self, BotError> {
        let raw: RawUpdate = serde_json::from_value(update)
            .map_err(|e| BotError::Protocol(format!("malformed update: {e}")))?;
        let id = raw.update_id;
        let mut rest = raw.rest;

        let kind = if let Some(message) = rest.remove("message") {
            EventKind::Message(
                serde_json::from_value(message)
                    .map_err(|e| BotError::Protocol(format!("malformed message in update {id}: {e}")))?,
            )
        } else if let Some(query) = rest.remove("callback_query") {
            EventKind::CallbackQuery(serde_json::from_value(query).map_err(|e| {
                BotError::Protocol(format!("malformed callback_query in update {id}: {e}"))
            })?)
        } else {
            match rest.into_iter().next() {
                Some((kind, payload)) => {
                    let sender = payload
                        .get("from")
                        .and_then(|from| serde_json::from_value(from.clone()).ok());
                    EventKind::Other {
                        kind,
                        sender,
                        payload,
                    }
                }
                None => EventKind::Other {
                    kind: "unknown".to_string(),
                    sender: None,
                    payload: Value::Null,
                },
            }
        };

        Ok(Event { id, kind })
    }

    /// Update type name as used by `allowed_updates`.
    pub fn kind_name(&self) -> &str {
        match &self.kind {
            EventKind::Message(_) => "message",
            EventKind::CallbackQuery(_) => "callback_query",
            EventKind::Other { kind, .. } => kind,
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match &self.kind {
            EventKind::Message(msg) => msg.from.as_ref(),
            EventKind::CallbackQuery(query) => Some(&query.from),
            EventKind::Other { sender, .. } => sender.as_ref(),
        }
    }

    /// Message text, callback data, or the update type.
    pub fn summary(&self) -> &str {
        match &self.kind {
            EventKind::Message(msg) => msg.text.as_deref().unwrap_or("message"),
            EventKind::CallbackQuery(query) => query.data.as_deref().unwrap_or("callback_query"),
            EventKind::Other { kind, .. } => kind,
        }
    }
}
