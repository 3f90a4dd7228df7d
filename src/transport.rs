use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::error::BotError;

/// Upper bound for the startup probe, whatever the poll timeout.
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Added on top of the long-poll wait so the server always answers first.
const FETCH_TIMEOUT_GRACE: Duration = Duration::from_secs(10);

const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateValidation {
    Enabled,
    Disabled,
}

/// Bot token. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for building request paths only.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    /// The numeric bot id prefix, which is not secret.
    pub fn redacted(&self) -> String {
        match self.0.split_once(':') {
            Some((bot_id, _)) => format!("{bot_id}:***"),
            None => "***".to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.redacted())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// HTTPS client settings shared by the probe and the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportProfile {
    certificate_validation: CertificateValidation,
    keep_alive: bool,
    connect_timeout: Duration,
    idle_timeout: Duration,
    user_agent: String,
}

impl TransportProfile {
    pub fn new(
        certificate_validation: CertificateValidation,
        keep_alive: bool,
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            certificate_validation,
            keep_alive,
            connect_timeout,
            idle_timeout,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn certificate_validation(&self) -> CertificateValidation {
        self.certificate_validation
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Build the one HTTP client used for every call of the session.
    pub fn build_client(&self) -> Result<reqwest::Client, BotError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.connect_timeout);

        if self.keep_alive {
            builder = builder
                .tcp_keepalive(TCP_KEEPALIVE_INTERVAL)
                .pool_idle_timeout(self.idle_timeout);
        } else {
            builder = builder.pool_max_idle_per_host(0);
        }

        if self.certificate_validation == CertificateValidation::Disabled {
            warn!("TLS certificate validation is DISABLED; do not use this outside development");
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| BotError::transport(format!("failed to build HTTP client: {e}")))
    }
}

/// Probe timeout as a fraction of the long-poll wait, clamped to [1s, 10s].
pub fn probe_timeout(poll_timeout: Duration) -> Duration {
    (poll_timeout / 3).clamp(MIN_PROBE_TIMEOUT, MAX_PROBE_TIMEOUT)
}

/// Client-side deadline for one getUpdates request.
pub fn fetch_timeout(poll_timeout: Duration) -> Duration {
    poll_timeout.saturating_add(FETCH_TIMEOUT_GRACE)
}
