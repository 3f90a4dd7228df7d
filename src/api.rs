use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::BotError;
use crate::event::{Event, Sender};
use crate::transport::{fetch_timeout, Credential};

/// Longest response excerpt carried in errors and logs.
const BODY_EXCERPT_LEN: usize = 500;

/// Who we are, as reported by getMe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: i64,
    pub display_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatesRequest {
    pub offset: i64,
    /// Long-poll wait in seconds
    pub timeout: u64,
    pub limit: u32,
    pub allowed_updates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyParameters {
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_parameters: Option<ReplyParameters>,
}

impl OutgoingMessage {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
            reply_parameters: None,
        }
    }

    pub fn html(mut self) -> Self {
        self.parse_mode = Some("HTML".to_string());
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_parameters = Some(ReplyParameters { message_id });
        self
    }
}

/// The slice of the Bot API the ingestion loop and its steps consume.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Single startup call verifying reachability and the credential.
    async fn get_me(&self, timeout: Duration) -> Result<BotIdentity, BotError>;

    async fn get_updates(&self, request: &UpdatesRequest) -> Result<Vec<Event>, BotError>;

    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), BotError>;

    async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), BotError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

/// Bot API client over HTTPS.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl HttpApi {
    pub fn new(client: reqwest::Client, base_url: &str, credential: Credential) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.credential.expose(), method)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(u16, String), BotError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BotError> {
        let (status, body) = self.send(request).await?;
        debug!("{} -> HTTP {} ({} bytes)", method, status, body.len());
        decode(status, &body)
    }
}

#[async_trait]
impl BotApi for HttpApi {
    async fn get_me(&self, timeout: Duration) -> Result<BotIdentity, BotError> {
        info!(
            "Verifying Bot API access for {} at {}",
            self.credential, self.base_url
        );
        let request = self.client.get(self.method_url("getMe")).timeout(timeout);
        let (status, body) = self.send(request).await?;

        info!("getMe response status: {}", status);
        info!("getMe response body (first {} chars): {}", BODY_EXCERPT_LEN, excerpt(&body));

        let user: Sender = decode(status, &body)?;
        Ok(BotIdentity {
            id: user.id,
            display_name: user.display_name,
            username: user.username,
        })
    }

    async fn get_updates(&self, request: &UpdatesRequest) -> Result<Vec<Event>, BotError> {
        let http_request = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(fetch_timeout(Duration::from_secs(request.timeout)))
            .json(request);
        let updates: Vec<Value> = self.call("getUpdates", http_request).await?;
        updates.into_iter().map(Event::from_update).collect()
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), BotError> {
        let request = self.client.post(self.method_url("sendMessage")).json(message);
        let _: Value = self.call("sendMessage", request).await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), BotError> {
        let request = self
            .client
            .post(self.method_url("answerCallbackQuery"))
            .json(&serde_json::json!({ "callback_query_id": callback_query_id }));
        let _: Value = self.call("answerCallbackQuery", request).await?;
        Ok(())
    }
}

/// Unwrap the `{ok, result}` envelope, classifying failures.
fn decode<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, BotError> {
    if !(200..300).contains(&status) {
        let retry_after = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.parameters)
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        return Err(BotError::from_status(status, excerpt(body), retry_after));
    }

    let envelope: ApiResponse<T> = serde_json::from_str(body).map_err(|e| {
        BotError::Protocol(format!("unexpected response body ({e}): {}", excerpt(body)))
    })?;

    if !envelope.ok {
        let retry_after = envelope
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);
        return Err(BotError::from_status(
            envelope.error_code.unwrap_or(400),
            envelope.description.unwrap_or_default(),
            retry_after,
        ));
    }

    envelope
        .result
        .ok_or_else(|| BotError::Protocol("response is missing `result`".to_string()))
}

/// First `BODY_EXCERPT_LEN` chars of `body`.
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
