use async_trait::async_trait;
use tracing::{debug, warn};

use crate::event::EventKind;
use crate::middleware::{Context, Next, Step};

/// Lets through only the update kinds we handle.
///
/// Callback queries are acknowledged here so the user's client stops its
/// loading indicator even when no later step reacts to them.
pub struct KindRouter {
    allowed: Vec<String>,
}

impl KindRouter {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    fn allows(&self, kind: &str) -> bool {
        self.allowed.iter().any(|k| k == kind)
    }
}

#[async_trait]
impl Step for KindRouter {
    fn name(&self) -> &'static str {
        "route-by-kind"
    }

    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> anyhow::Result<()> {
        let event = cx.event;
        if !self.allows(event.kind_name()) {
            debug!(
                "Skipping update {}: kind '{}' not routed",
                event.id,
                event.kind_name()
            );
            return Ok(());
        }

        match &event.kind {
            EventKind::Message(_) => next.run(cx).await,
            EventKind::CallbackQuery(query) => {
                if let Err(e) = cx.api.answer_callback_query(&query.id).await {
                    warn!("Failed to answer callback query {}: {}", query.id, e);
                }
                next.run(cx).await
            }
            EventKind::Other { kind, .. } => {
                debug!("No route for update {} of kind '{}'", event.id, kind);
                Ok(())
            }
        }
    }
}
