mod api;
mod config;
mod error;
mod event;
mod lifecycle;
mod middleware;
mod poller;
#[cfg(test)]
mod testing;
mod transport;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::middleware::commands::CommandHandler;
use crate::middleware::logging::LoggingStep;
use crate::middleware::routing::KindRouter;
use crate::middleware::MiddlewareChain;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pollbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    std::panic::set_hook(Box::new(|panic| {
        error!("Thread panicked: {}", panic);
    }));

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    info!("Configuration loaded successfully");
    info!("  Bot token: {}", config.credential());
    info!("  API: {}", config.telegram.api_base_url);
    info!(
        "  Verify certificates: {}",
        config.transport.verify_certificates
    );
    info!(
        "  Polling: timeout {}s, limit {}, updates {:?}",
        config.polling.timeout_secs, config.polling.limit, config.polling.allowed_updates
    );

    // Build the middleware chain
    let mut chain = MiddlewareChain::new(config.polling.handler_timeout());
    chain
        .register(LoggingStep)
        .register(KindRouter::new(config.polling.allowed_updates.clone()))
        .register(CommandHandler::with_defaults());
    info!("  Middleware: {:?}", chain.step_names());

    let mut lifecycle = Lifecycle::from_config(&config, chain);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        info!("Received {}, stopping gracefully...", signal);
        let _ = stop_tx.send(true);
    });

    info!("Bot is starting...");
    let result = lifecycle.run(stop_rx).await;
    info!("Lifecycle transitions: {:?}", lifecycle.transitions());
    let stats = result.context("Bot terminated with an unrecoverable error")?;

    info!(
        "Bot stopped: {} update(s) handled, {} failed, {} transient error(s)",
        stats.events_dispatched, stats.dispatch_failures, stats.transient_errors
    );
    Ok(())
}

/// Wait for SIGINT or SIGTERM; both mean a graceful stop.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!("Failed to listen for SIGINT: {}", e);
                    }
                    "SIGINT"
                }
                _ = terminate.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}
