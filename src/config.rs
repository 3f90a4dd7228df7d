use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::transport::{CertificateValidation, Credential, TransportProfile};

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Longest long-poll wait we accept, in seconds.
pub const MAX_POLL_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Usually left empty and supplied via TELEGRAM_BOT_TOKEN
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_true")]
    pub verify_certificates: bool,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Long-poll wait passed to getUpdates, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_allowed_updates")]
    pub allowed_updates: Vec<String>,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_limit() -> u32 {
    100
}

fn default_allowed_updates() -> Vec<String> {
    vec!["message".to_string(), "callback_query".to_string()]
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_handler_timeout_secs() -> u64 {
    90
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            verify_certificates: true,
            keep_alive: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            limit: default_limit(),
            allowed_updates: default_allowed_updates(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

impl PollingConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults, so the bot
    /// can run from environment variables alone.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply TELEGRAM_BOT_TOKEN, TELEGRAM_API_URL and BOT_TLS_VERIFY overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(url) = lookup("TELEGRAM_API_URL").filter(|u| !u.trim().is_empty()) {
            self.telegram.api_base_url = url.trim().to_string();
        }
        if let Some(verify) = lookup("BOT_TLS_VERIFY") {
            self.transport.verify_certificates =
                !matches!(verify.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN environment variable is not set");
        }
        if self.telegram.api_base_url.trim().is_empty() {
            anyhow::bail!("telegram.api_base_url cannot be empty");
        }
        if !(1..=100).contains(&self.polling.limit) {
            anyhow::bail!(
                "polling.limit must be between 1 and 100, got {}",
                self.polling.limit
            );
        }
        if !(1..=MAX_POLL_TIMEOUT_SECS).contains(&self.polling.timeout_secs) {
            anyhow::bail!(
                "polling.timeout_secs must be between 1 and {}, got {}",
                MAX_POLL_TIMEOUT_SECS,
                self.polling.timeout_secs
            );
        }
        if self.polling.handler_timeout_secs == 0 {
            anyhow::bail!("polling.handler_timeout_secs must be at least 1");
        }
        if self.polling.retry_base_delay_ms > self.polling.retry_max_delay_ms {
            anyhow::bail!("polling.retry_base_delay_ms exceeds polling.retry_max_delay_ms");
        }
        Ok(())
    }

    pub fn credential(&self) -> Credential {
        Credential::new(self.telegram.bot_token.trim())
    }

    pub fn transport_profile(&self) -> TransportProfile {
        let validation = if self.transport.verify_certificates {
            CertificateValidation::Enabled
        } else {
            CertificateValidation::Disabled
        };
        TransportProfile::new(
            validation,
            self.transport.keep_alive,
            Duration::from_millis(self.transport.connect_timeout_ms),
            Duration::from_millis(self.transport.idle_timeout_ms),
        )
    }
}
