use async_trait::async_trait;
use tracing::info;

use crate::event::Event;
use crate::middleware::{Context, Next, Step};

/// Logs who sent what, then passes the event on.
pub struct LoggingStep;

/// One log line per update: sender name and id, then the text or kind.
pub fn describe(event: &Event) -> String {
    match event.sender() {
        Some(sender) => format!(
            "Received update {} from {} (ID: {}): {}",
            event.id,
            sender.display_name,
            sender.id,
            event.summary()
        ),
        None => format!(
            "Received update {} from unknown sender: {}",
            event.id,
            event.summary()
        ),
    }
}

#[async_trait]
impl Step for LoggingStep {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> anyhow::Result<()> {
        info!("{}", describe(cx.event));
        next.run(cx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::commands::CommandHandler;
    use crate::middleware::{DispatchOutcome, MiddlewareChain};
    use crate::testing::{callback_event, identity, other_event, text_event, ScriptedApi};
    use std::time::Duration;

    #[test]
    fn test_describe_message() {
        let event = text_event(3, 7, "Alice", "hello there");
        assert_eq!(
            describe(&event),
            "Received update 3 from Alice (ID: 7): hello there"
        );
    }

    #[test]
    fn test_describe_callback_and_unknown_sender() {
        let event = callback_event(4, "cbq-1", "slot:10:00");
        assert_eq!(
            describe(&event),
            "Received update 4 from Alice (ID: 7): slot:10:00"
        );

        let event = other_event(5, "my_chat_member");
        assert_eq!(
            describe(&event),
            "Received update 5 from unknown sender: my_chat_member"
        );
    }

    #[tokio::test]
    async fn test_logging_step_passes_event_on() {
        let mut chain = MiddlewareChain::new(Duration::from_secs(5));
        chain
            .register(LoggingStep)
            .register(CommandHandler::with_defaults());

        let api = ScriptedApi::new();
        let me = identity();
        let event = text_event(1, 7, "Alice", "/start");
        let cx = Context {
            event: &event,
            api: &api,
            me: &me,
        };

        assert_eq!(chain.dispatch(&cx).await, DispatchOutcome::Completed);
        assert_eq!(api.sent.lock().unwrap().len(), 1);
    }
}
