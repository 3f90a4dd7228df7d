use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api::{BotApi, HttpApi};
use crate::config::Config;
use crate::error::BotError;
use crate::middleware::MiddlewareChain;
use crate::poller::{stop_requested, PollSettings, PollStats, Poller};
use crate::transport::{probe_timeout, Credential, TransportProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Probing,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl LifecycleState {
    #[allow(dead_code)]
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Created, Probing)
                | (Probing, Running)
                | (Probing, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("bot session already started (state {0:?})")]
    AlreadyStarted(LifecycleState),

    #[error("startup probe failed")]
    Probe(#[source] BotError),

    #[error("polling loop failed")]
    Fatal(#[source] BotError),
}

/// Owns the session: credential, transport, and the single polling loop.
pub struct Lifecycle {
    credential: Credential,
    profile: TransportProfile,
    api_base_url: String,
    settings: PollSettings,
    chain: Option<MiddlewareChain>,
    state: watch::Sender<LifecycleState>,
    history: Vec<LifecycleState>,
    transport: Option<Arc<dyn BotApi>>,
}

impl Lifecycle {
    pub fn new(
        credential: Credential,
        profile: TransportProfile,
        api_base_url: impl Into<String>,
        settings: PollSettings,
        chain: MiddlewareChain,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            credential,
            profile,
            api_base_url: api_base_url.into(),
            settings,
            chain: Some(chain),
            state,
            history: vec![LifecycleState::Created],
            transport: None,
        }
    }

    pub fn from_config(config: &Config, chain: MiddlewareChain) -> Self {
        Self::new(
            config.credential(),
            config.transport_profile(),
            config.telegram.api_base_url.clone(),
            PollSettings::from_config(&config.polling),
            chain,
        )
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    #[allow(dead_code)]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Every state entered so far, starting with `Created`.
    pub fn transitions(&self) -> &[LifecycleState] {
        &self.history
    }

    #[allow(dead_code)]
    pub fn holds_transport(&self) -> bool {
        self.transport.is_some()
    }

    fn transition(&mut self, next: LifecycleState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!("Unexpected lifecycle transition {:?} -> {:?}", current, next);
        }
        info!("Lifecycle: {:?} -> {:?}", current, next);
        self.state.send_replace(next);
        self.history.push(next);
    }

    fn release_transport(&mut self) {
        if let Some(api) = self.transport.take() {
            drop(api);
            info!("Transport released");
        }
    }

    fn fail(&mut self) {
        self.release_transport();
        self.transition(LifecycleState::Failed);
    }

    /// Probe the API, then poll until `shutdown` is set or a fatal error
    /// occurs. Can only be called once.
    pub async fn run(
        &mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<PollStats, LifecycleError> {
        let current = self.state();
        if current != LifecycleState::Created {
            return Err(LifecycleError::AlreadyStarted(current));
        }
        let Some(chain) = self.chain.take() else {
            return Err(LifecycleError::AlreadyStarted(current));
        };
        if chain.is_empty() {
            warn!("No middleware registered; updates will be acknowledged and dropped");
        }

        self.transition(LifecycleState::Probing);
        let client = match self.profile.build_client() {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to set up transport: {}", e);
                self.fail();
                return Err(LifecycleError::Probe(e));
            }
        };
        let api: Arc<dyn BotApi> = Arc::new(HttpApi::new(
            client,
            &self.api_base_url,
            self.credential.clone(),
        ));
        self.transport = Some(api.clone());

        let me = match api.get_me(probe_timeout(self.settings.poll_timeout)).await {
            Ok(me) => me,
            Err(e) => {
                error!("Bot API probe failed: {}", e);
                drop(api);
                self.fail();
                return Err(LifecycleError::Probe(e));
            }
        };
        info!(
            "Authorized as {} (@{}, id {})",
            me.display_name,
            me.username.as_deref().unwrap_or("-"),
            me.id
        );

        self.transition(LifecycleState::Running);
        let mut poller = Poller::new(api, Arc::new(chain), me, self.settings.clone());
        let mut stop_seen = shutdown.clone();
        let mut stopping = false;

        let result = {
            let poll = poller.run(shutdown);
            tokio::pin!(poll);
            loop {
                tokio::select! {
                    res = &mut poll => break res,
                    _ = stop_requested(&mut stop_seen), if !stopping => {
                        stopping = true;
                        info!("Stop requested; draining the current polling cycle");
                        self.transition(LifecycleState::Stopping);
                    }
                }
            }
        };
        info!("Next update offset: {}", poller.cursor().value());
        drop(poller);

        match result {
            Ok(stats) => {
                if !stopping {
                    self.transition(LifecycleState::Stopping);
                }
                self.release_transport();
                self.transition(LifecycleState::Stopped);
                Ok(stats)
            }
            Err(e) => {
                error!("Polling loop failed: {}", e);
                self.fail();
                Err(LifecycleError::Fatal(e))
            }
        }
    }
}
