//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::api::{BotApi, BotIdentity, OutgoingMessage, UpdatesRequest};
use crate::error::BotError;
use crate::event::Event;

pub fn identity() -> BotIdentity {
    BotIdentity {
        id: 42,
        display_name: "TestBot".to_string(),
        username: Some("test_bot".to_string()),
    }
}

pub fn text_event(id: i64, sender_id: i64, name: &str, text: &str) -> Event {
    Event::from_update(json!({
        "update_id": id,
        "message": {
            "message_id": id * 10,
            "from": {"id": sender_id, "is_bot": false, "first_name": name},
            "chat": {"id": sender_id, "type": "private"},
            "date": 1700000000,
            "text": text
        }
    }))
    .expect("valid test update")
}

pub fn callback_event(id: i64, query_id: &str, data: &str) -> Event {
    Event::from_update(json!({
        "update_id": id,
        "callback_query": {
            "id": query_id,
            "from": {"id": 7, "first_name": "Alice"},
            "data": data
        }
    }))
    .expect("valid test update")
}

pub fn other_event(id: i64, kind: &str) -> Event {
    let mut update = serde_json::Map::new();
    update.insert("update_id".to_string(), json!(id));
    update.insert(kind.to_string(), json!({"chat": {"id": 1}}));
    Event::from_update(update.into()).expect("valid test update")
}

/// Bot API fake: getUpdates answers from a script, everything else is recorded.
/// Once the script runs out, fetches return empty batches after `idle_delay`.
pub struct ScriptedApi {
    batches: Mutex<VecDeque<Result<Vec<Event>, BotError>>>,
    fetch_delay: Duration,
    idle_delay: Duration,
    pub requests: Mutex<Vec<UpdatesRequest>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub answered: Mutex<Vec<String>>,
    pub fetch_started: Notify,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            fetch_delay: Duration::ZERO,
            idle_delay: Duration::from_millis(5),
            requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            answered: Mutex::new(Vec::new()),
            fetch_started: Notify::new(),
        }
    }

    /// Every scripted fetch takes this long to answer.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn push_batch(&self, batch: Result<Vec<Event>, BotError>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.requests.lock().unwrap().iter().map(|r| r.offset).collect()
    }
}

#[async_trait]
impl BotApi for ScriptedApi {
    async fn get_me(&self, _timeout: Duration) -> Result<BotIdentity, BotError> {
        Ok(identity())
    }

    async fn get_updates(&self, request: &UpdatesRequest) -> Result<Vec<Event>, BotError> {
        self.requests.lock().unwrap().push(request.clone());
        self.fetch_started.notify_one();

        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => {
                if !self.fetch_delay.is_zero() {
                    tokio::time::sleep(self.fetch_delay).await;
                }
                batch
            }
            None => {
                tokio::time::sleep(self.idle_delay).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), BotError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), BotError> {
        self.answered
            .lock()
            .unwrap()
            .push(callback_query_id.to_string());
        Ok(())
    }
}
