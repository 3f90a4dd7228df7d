use std::collections::HashMap;

use anyhow::Context as _;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::OutgoingMessage;
use crate::event::{EventKind, Message};
use crate::middleware::{Context, Next, Step};

/// A bot command callback, e.g. the handler behind `/start`.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, cx: &Context<'_>, message: &Message, args: &str) -> anyhow::Result<()>;
}

/// Runs the registered command matching a message's `/name`. Anything that
/// is not a known command is passed on untouched.
pub struct CommandHandler {
    commands: HashMap<String, Box<dyn Command>>,
}

impl CommandHandler {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Handler with the built-in commands registered.
    pub fn with_defaults() -> Self {
        Self::new().command("start", StartCommand)
    }

    pub fn command<C: Command + 'static>(mut self, name: &str, command: C) -> Self {
        self.commands.insert(name.to_string(), Box::new(command));
        self
    }
}

impl Default for CommandHandler {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl Step for CommandHandler {
    fn name(&self) -> &'static str {
        "commands"
    }

    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> anyhow::Result<()> {
        let EventKind::Message(message) = &cx.event.kind else {
            return next.run(cx).await;
        };
        let Some(text) = message.text.as_deref() else {
            return next.run(cx).await;
        };
        let Some((name, args)) = parse_command(text, cx.me.username.as_deref()) else {
            return next.run(cx).await;
        };

        match self.commands.get(name) {
            Some(command) => {
                debug!("Running /{} for update {}", name, cx.event.id);
                command.execute(cx, message, args).await
            }
            None => {
                debug!("Unknown command /{} in update {}", name, cx.event.id);
                next.run(cx).await
            }
        }
    }
}

/// Split `/name[@bot] args` into `(name, args)`.
///
/// Commands explicitly addressed to another bot yield `None`.
pub fn parse_command<'a>(text: &'a str, bot_username: Option<&str>) -> Option<(&'a str, &'a str)> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = match head.split_once('@') {
        Some((name, mention)) => {
            let ours = bot_username.is_some_and(|u| u.eq_ignore_ascii_case(mention));
            if !ours {
                return None;
            }
            name
        }
        None => head,
    };
    if name.is_empty() {
        return None;
    }
    Some((name, args))
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// `/start`: greet the sender by name.
pub struct StartCommand;

#[async_trait]
impl Command for StartCommand {
    async fn execute(&self, cx: &Context<'_>, message: &Message, _args: &str) -> anyhow::Result<()> {
        let name = message
            .from
            .as_ref()
            .map(|s| s.display_name.as_str())
            .unwrap_or("User");
        let reply = OutgoingMessage::text(
            message.chat.id,
            format!("Hello {}! I'm your bot.", escape_html(name)),
        )
        .html()
        .reply_to(message.message_id);

        cx.api
            .send_message(&reply)
            .await
            .with_context(|| format!("Failed to reply to /start in chat {}", message.chat.id))?;
        info!("Greeted {} in chat {}", name, message.chat.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{DispatchOutcome, MiddlewareChain};
    use crate::testing::{identity, text_event, ScriptedApi};
    use std::time::Duration;

    async fn run(handler: CommandHandler, text: &str, sender: &str) -> (DispatchOutcome, ScriptedApi) {
        let mut chain = MiddlewareChain::new(Duration::from_secs(5));
        chain.register(handler);
        let api = ScriptedApi::new();
        let me = identity();
        let event = text_event(1, 7, sender, text);
        let cx = Context {
            event: &event,
            api: &api,
            me: &me,
        };
        let outcome = chain.dispatch(&cx).await;
        (outcome, api)
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/start", None), Some(("start", "")));
        assert_eq!(parse_command("/start  deep-link ", None), Some(("start", "deep-link")));
        assert_eq!(
            parse_command("/start@test_bot", Some("test_bot")),
            Some(("start", ""))
        );
        assert_eq!(
            parse_command("/start@Test_Bot x", Some("test_bot")),
            Some(("start", "x"))
        );
        assert_eq!(parse_command("/start@other_bot", Some("test_bot")), None);
        assert_eq!(parse_command("/start@test_bot", None), None);
        assert_eq!(parse_command("hello /start", None), None);
        assert_eq!(parse_command("/", None), None);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>Tom & Jerry</b>"), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
        assert_eq!(escape_html("Alice"), "Alice");
    }

    #[tokio::test]
    async fn test_start_greets_sender_by_name() {
        let (outcome, api) = run(CommandHandler::with_defaults(), "/start", "Alice").await;
        assert_eq!(outcome, DispatchOutcome::Completed);

        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 7);
        assert!(sent[0].text.contains("Alice"));
        assert_eq!(sent[0].parse_mode.as_deref(), Some("HTML"));
        assert_eq!(sent[0].reply_parameters.as_ref().unwrap().message_id, 10);
    }

    #[tokio::test]
    async fn test_start_escapes_display_name() {
        let (_, api) = run(CommandHandler::with_defaults(), "/start", "<script>").await;
        let sent = api.sent.lock().unwrap();
        assert_eq!(sent[0].text, "Hello &lt;script&gt;! I'm your bot.");
    }

    #[tokio::test]
    async fn test_start_greets_by_first_name_only() {
        let mut chain = MiddlewareChain::new(Duration::from_secs(5));
        chain.register(CommandHandler::with_defaults());
        let api = ScriptedApi::new();
        let me = identity();
        let event = crate::event::Event::from_update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "from": {"id": 7, "is_bot": false, "first_name": "Alice", "last_name": "Liddell"},
                "chat": {"id": 7, "type": "private"},
                "date": 1700000000,
                "text": "/start"
            }
        }))
        .unwrap();
        let cx = Context {
            event: &event,
            api: &api,
            me: &me,
        };
        chain.dispatch(&cx).await;

        let sent = api.sent.lock().unwrap();
        assert_eq!(sent[0].text, "Hello Alice! I'm your bot.");
    }

    #[tokio::test]
    async fn test_plain_text_and_unknown_commands_are_ignored() {
        for text in ["hello there", "/unknown", "/start@someone_else"] {
            let (outcome, api) = run(CommandHandler::with_defaults(), text, "Alice").await;
            assert_eq!(outcome, DispatchOutcome::Completed);
            assert!(api.sent.lock().unwrap().is_empty(), "replied to {text:?}");
        }
    }

    #[tokio::test]
    async fn test_custom_command_receives_args() {
        struct Echo;

        #[async_trait]
        impl Command for Echo {
            async fn execute(&self, cx: &Context<'_>, message: &Message, args: &str) -> anyhow::Result<()> {
                cx.api
                    .send_message(&OutgoingMessage::text(message.chat.id, args))
                    .await?;
                Ok(())
            }
        }

        let handler = CommandHandler::new().command("echo", Echo);
        let (_, api) = run(handler, "/echo@test_bot ping pong", "Alice").await;
        assert_eq!(api.sent.lock().unwrap()[0].text, "ping pong");
    }
}
