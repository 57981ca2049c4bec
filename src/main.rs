//! Herald - Discord to Telegram mention notifier
//!
//! Watches Discord guilds and notifies subscribers on Telegram whenever
//! their handle or one of their roles is mentioned, per the preferences
//! they set up in a Telegram chat with the bot.

mod bridge;
mod common;
mod config;
mod discord;
mod store;
mod telegram;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use bridge::{Bridge, Registry, SharedRegistry};
use common::messages::SourceEvent;
use config::{env::get_config_path, load_and_validate};
use discord::EventForwarder;
use store::SubscriberStore;
use telegram::{Dialogue, TelegramApi, TelegramSender};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Herald v{} starting...", env!("CARGO_PKG_VERSION"));

    for var in config::env::check_empty_env_vars() {
        warn!("Environment variable {} is set but empty", var);
    }

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        error!("See the example configuration for reference.");
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Store: {}", config.store_path());
    info!(
        "  Broadcast channels: {}",
        config.discord.broadcast_channels().len()
    );
    if let Some(guild) = config.discord.default_guild {
        info!("  Default guild: {}", guild);
    }

    // Open the subscriber store and build the first registry snapshot
    let store = Arc::new(SubscriberStore::open(config.store_path()).await?);
    let records = store.load_all().await;
    info!("Loaded {} subscriber records", records.len());

    let registry: SharedRegistry = Arc::new(Registry::new());
    registry.install(records);

    // Telegram API sanity check before anything connects
    let api = Arc::new(TelegramApi::new(
        config.telegram.api_url(),
        &config.telegram.token,
        config.telegram.poll_timeout_secs(),
    )?);
    let profile = api.get_me().await.map_err(|e| {
        error!("Telegram getMe failed: {}", e);
        error!("Please check telegram.token.");
        e
    })?;
    info!(
        "Telegram bot @{} (id {}) ready",
        profile.username.as_deref().unwrap_or("unknown"),
        profile.id
    );

    // ============================================================
    // Create channels for communication
    // ============================================================

    let (events_tx, events_rx) = mpsc::unbounded_channel::<SourceEvent>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Discord client with the event forwarder installed
    let forwarder = EventForwarder::new(events_tx, config.discord.broadcast_channels());
    let mut client = discord::build_client(&config.discord.token, forwarder).await?;
    let cache = client.cache.clone();
    let shard_manager = client.shard_manager.clone();

    let sender = Arc::new(TelegramSender::new(api.clone()));

    // ============================================================
    // Spawn the three long-running tasks
    // ============================================================

    let bridge = Bridge::new(registry.clone(), store.clone(), sender, cache.clone());
    let mut bridge_task = tokio::spawn(bridge.run(events_rx, shutdown_rx.clone()));

    let dialogue = Dialogue::new(api, store, registry, cache, &config);
    let mut dialogue_task = tokio::spawn(dialogue.run(shutdown_rx.clone()));

    info!("Starting Discord client...");
    let discord_task = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            error!("Discord client error: {}", e);
        }
    });

    // ============================================================
    // Run until a task dies or a shutdown signal arrives
    // ============================================================
    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping...");
            true
        }
        _ = &mut bridge_task => false,
        _ = &mut dialogue_task => false,
        _ = discord_task => false,
    };

    // Handle graceful shutdown
    if shutdown {
        if let Err(e) = shutdown_tx.send(true) {
            debug!("Shutdown channel closed (loops already exited): {}", e);
        }

        info!("Initiating graceful Discord shutdown...");
        shard_manager.shutdown_all().await;

        let timeout = tokio::time::Duration::from_secs(5);
        for (name, task) in [("Bridge", bridge_task), ("Dialogue", dialogue_task)] {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => info!("{} task stopped", name),
                Ok(Err(e)) => warn!("{} task panicked: {}", name, e),
                Err(_) => warn!("{} task shutdown timed out", name),
            }
        }
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
