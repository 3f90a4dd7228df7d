use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{BotApi, BotIdentity, UpdatesRequest};
use crate::config::PollingConfig;
use crate::error::BotError;
use crate::event::Event;
use crate::middleware::{Context, DispatchOutcome, MiddlewareChain};

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_timeout: Duration,
    pub limit: u32,
    pub allowed_updates: Vec<String>,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl PollSettings {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            limit: config.limit,
            allowed_updates: config.allowed_updates.clone(),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// `base * 2^attempt`, capped at `retry_max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// Next update id to ask for. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor(i64);

impl Cursor {
    pub fn value(self) -> i64 {
        self.0
    }

    pub fn acknowledge(&mut self, event_id: i64) {
        self.0 = self.0.max(event_id.saturating_add(1));
    }

    /// Whether an update with this id was already acknowledged.
    pub fn is_behind(self, event_id: i64) -> bool {
        event_id < self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub events_dispatched: u64,
    pub dispatch_failures: u64,
    pub stale_skipped: u64,
    pub transient_errors: u64,
}

/// The getUpdates loop: fetch, dispatch each event, acknowledge, repeat.
pub struct Poller {
    api: Arc<dyn BotApi>,
    chain: Arc<MiddlewareChain>,
    me: BotIdentity,
    settings: PollSettings,
    cursor: Cursor,
    stats: PollStats,
}

impl Poller {
    pub fn new(
        api: Arc<dyn BotApi>,
        chain: Arc<MiddlewareChain>,
        me: BotIdentity,
        settings: PollSettings,
    ) -> Self {
        Self {
            api,
            chain,
            me,
            settings,
            cursor: Cursor::default(),
            stats: PollStats::default(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    #[allow(dead_code)]
    pub fn stats(&self) -> PollStats {
        self.stats
    }

    fn request(&self) -> UpdatesRequest {
        UpdatesRequest {
            offset: self.cursor.value(),
            timeout: self.settings.poll_timeout.as_secs(),
            limit: self.settings.limit,
            allowed_updates: self.settings.allowed_updates.clone(),
        }
    }

    /// Poll until `shutdown` flips to true. The stop flag is only checked
    /// between cycles, so a fetched batch is always dispatched in full.
    /// Returns an error only for non-retryable failures.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<PollStats, BotError> {
        info!(
            "Polling started (timeout {}s, limit {}, updates {:?})",
            self.settings.poll_timeout.as_secs(),
            self.settings.limit,
            self.settings.allowed_updates
        );
        let mut attempt: u32 = 0;

        while !*shutdown.borrow_and_update() {
            let request = self.request();
            match self.api.get_updates(&request).await {
                Ok(events) => {
                    attempt = 0;
                    self.stats.cycles += 1;
                    self.process_batch(events).await;
                }
                Err(e) if e.is_retryable() => {
                    self.stats.transient_errors += 1;
                    let delay = self
                        .settings
                        .backoff(attempt)
                        .max(e.retry_after().unwrap_or_default());
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "getUpdates failed (attempt {}): {}; retrying offset {} in {:?}",
                        attempt,
                        e,
                        request.offset,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop_requested(&mut shutdown) => break,
                    }
                }
                Err(e) => {
                    error!(
                        "getUpdates failed permanently at offset {}: {}",
                        request.offset, e
                    );
                    return Err(e);
                }
            }
        }

        info!(
            "Polling stopped at offset {} ({} cycles, {} events, {} failed)",
            self.cursor.value(),
            self.stats.cycles,
            self.stats.events_dispatched,
            self.stats.dispatch_failures
        );
        Ok(self.stats)
    }

    /// Dispatch a fetched batch in id order, then move the cursor past it.
    /// The cursor advances whatever the dispatch outcomes were.
    pub async fn process_batch(&mut self, mut events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        events.sort_by_key(|e| e.id);
        debug!("Fetched {} update(s) at offset {}", events.len(), self.cursor.value());

        let mut batch_cursor = self.cursor;
        for event in &events {
            if batch_cursor.is_behind(event.id) {
                debug!("Skipping already acknowledged update {}", event.id);
                self.stats.stale_skipped += 1;
                continue;
            }
            let cx = Context {
                event,
                api: self.api.as_ref(),
                me: &self.me,
            };
            if self.chain.dispatch(&cx).await == DispatchOutcome::Failed {
                self.stats.dispatch_failures += 1;
            }
            self.stats.events_dispatched += 1;
            batch_cursor.acknowledge(event.id);
        }
        self.cursor = batch_cursor;
    }
}

/// Resolves once the stop flag is set. Never resolves if the sender is gone.
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
