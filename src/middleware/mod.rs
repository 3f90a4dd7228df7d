//! Ordered middleware pipeline every event passes through.
//!
//! Each step receives the event context and a [`Next`] handle. Calling
//! `next.run(cx)` hands the event to the following step; returning without
//! calling it stops propagation for that event.

pub mod commands;
pub mod logging;
pub mod routing;

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::api::{BotApi, BotIdentity};
use crate::error::BotError;
use crate::event::Event;

/// What a step gets to see for one event.
pub struct Context<'a> {
    pub event: &'a Event,
    pub api: &'a dyn BotApi,
    pub me: &'a BotIdentity,
}

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> anyhow::Result<()>;
}

/// Continuation pointing at the step after the current one.
pub struct Next<'a> {
    steps: &'a [Box<dyn Step>],
    index: usize,
}

impl<'a> Next<'a> {
    pub async fn run(self, cx: &Context<'_>) -> anyhow::Result<()> {
        match self.steps.get(self.index) {
            Some(step) => {
                let next = Next {
                    steps: self.steps,
                    index: self.index + 1,
                };
                step.handle(cx, next).await
            }
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every step that was reached returned Ok (including short-circuits)
    Completed,
    /// A step failed, panicked or timed out; already logged
    Failed,
}

pub struct MiddlewareChain {
    steps: Vec<Box<dyn Step>>,
    handler_timeout: Duration,
}

impl MiddlewareChain {
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            handler_timeout,
        }
    }

    /// Append a step. Order of registration is order of execution.
    pub fn register<S: Step + 'static>(&mut self, step: S) -> &mut Self {
        debug!("Registered middleware step #{}: {}", self.steps.len(), step.name());
        self.steps.push(Box::new(step));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run one event through the chain. Failures stay contained to this event.
    pub async fn dispatch(&self, cx: &Context<'_>) -> DispatchOutcome {
        let event_id = cx.event.id;
        let start = Next {
            steps: &self.steps,
            index: 0,
        };
        let run = AssertUnwindSafe(start.run(cx)).catch_unwind();

        let failure = match tokio::time::timeout(self.handler_timeout, run).await {
            Ok(Ok(Ok(()))) => return DispatchOutcome::Completed,
            Ok(Ok(Err(e))) => format!("{:#}", e),
            Ok(Err(panic)) => format!("step panicked: {}", panic_message(&*panic)),
            Err(_) => format!("timed out after {:?}", self.handler_timeout),
        };

        let err = BotError::Handler {
            event_id,
            message: failure,
        };
        error!("{}", err);
        DispatchOutcome::Failed
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
