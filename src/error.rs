use std::time::Duration;

use thiserror::Error;

/// Failures of the Bot API session, classified by how the loop reacts to them.
#[derive(Debug, Error)]
pub enum BotError {
    /// Rejected credential (or any other 4xx). Never retried.
    #[error("authentication failed (HTTP {status}): {body}")]
    Authentication { status: u16, body: String },

    /// Network failure, timeout, 5xx or rate limiting. Retried while polling.
    #[error("transport error{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Response body did not match the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A middleware step failed on a single event.
    #[error("handler failed on event {event_id}: {message}")]
    Handler { event_id: i64, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl BotError {
    pub fn transport(message: impl Into<String>) -> Self {
        BotError::Transport {
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Map a non-success HTTP status (or API `error_code`) onto the taxonomy.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => BotError::Transport {
                status: Some(status),
                message: body,
                retry_after,
            },
            400..=499 => BotError::Authentication { status, body },
            _ => BotError::Transport {
                status: Some(status),
                message: body,
                retry_after,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BotError::Transport { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BotError::Transport { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the bot token
        let err = err.without_url();
        if err.is_decode() {
            return BotError::Protocol(err.to_string());
        }
        BotError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            retry_after: None,
        }
    }
}
