//! Unified bridge module for Discord-Telegram notification flow.
//!
//! Ties the pieces together: the registry holds subscriber snapshots, the
//! router picks recipients, the renderer rewrites content, the dispatcher
//! delivers. The `Bridge` loop consumes source events strictly one at a
//! time, so all sends for an event finish before the next event is routed.
//!
//! ## Module Structure
//!
//! - `registry`: subscriber snapshots and the notification index
//! - `render`: content transformation into Telegram-safe HTML
//! - `router`: recipient selection for an event
//! - `dispatcher`: concurrent delivery and failure handling

pub mod dispatcher;
pub mod registry;
pub mod render;
pub mod router;

// Re-export main types for convenience
pub use dispatcher::{Dispatcher, NotificationSender};
pub use registry::{Registry, RegistrySnapshot, SharedRegistry};
pub use render::{EntityResolver, MessageRenderer};
pub use router::{route, DeliveryTarget, NotifyReason};

use std::sync::Arc;

use serenity::cache::Cache;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::common::messages::{MessageEvent, SourceEvent, VerifyRequest};
use crate::discord::resolver::CacheResolver;
use crate::store::SubscriberStore;

/// The main loop joining the Discord event stream to Telegram delivery.
pub struct Bridge {
    registry: SharedRegistry,
    store: Arc<SubscriberStore>,
    dispatcher: Dispatcher,
    sender: Arc<dyn NotificationSender>,
    cache: Arc<Cache>,
}

impl Bridge {
    pub fn new(
        registry: SharedRegistry,
        store: Arc<SubscriberStore>,
        sender: Arc<dyn NotificationSender>,
        cache: Arc<Cache>,
    ) -> Self {
        let dispatcher = Dispatcher::new(sender.clone(), store.clone(), registry.clone());
        Self {
            registry,
            store,
            dispatcher,
            sender,
            cache,
        }
    }

    /// Consume source events until shutdown is signaled or the stream ends.
    ///
    /// Events are handled strictly in arrival order, one at a time.
    pub async fn run(
        self,
        mut events_rx: mpsc::UnboundedReceiver<SourceEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Bridge loop started");
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Bridge loop stopping");
                        break;
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Some(SourceEvent::Message(event)) => self.handle_message(event).await,
                        Some(SourceEvent::Verify(request)) => self.handle_verify(request).await,
                        None => {
                            info!("Source event stream closed, bridge loop stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, event: MessageEvent) {
        let snapshot = self.registry.snapshot();
        let targets = route(&event, &snapshot.index, &snapshot.subscribers);
        if targets.is_empty() {
            debug!(channel = %event.channel_name, "No recipients for message");
            for role in &event.role_mentions {
                debug!(role_id = role.id, role = %role.name, "Role mention matched no watcher");
            }
            return;
        }

        info!(
            channel = %event.channel_name,
            channel_id = event.channel_id,
            recipients = targets.len(),
            broadcast = event.broadcast,
            "Routing message"
        );
        for target in &targets {
            debug!(chat_id = target.chat_id, reason = ?target.reason, "Delivery target");
        }

        let resolver = CacheResolver::for_guild(self.cache.clone(), event.guild_id);
        self.dispatcher.deliver(&event, &targets, &resolver).await;
    }

    /// Handle a verification request received via Discord direct message.
    async fn handle_verify(&self, request: VerifyRequest) {
        match self
            .store
            .confirm_handle(request.chat_id, &request.discord_username)
            .await
        {
            Ok(true) => {
                info!(chat_id = request.chat_id, "Subscriber verified");
                self.registry.install(self.store.load_all().await);
                let ack = "Your Discord identity is confirmed. Notifications are active.";
                if let Err(error) = self.sender.send(request.chat_id, ack).await {
                    warn!(
                        chat_id = request.chat_id,
                        %error,
                        "Failed to send verification confirmation"
                    );
                }
            }
            Ok(false) => {
                debug!(
                    chat_id = request.chat_id,
                    username = %request.discord_username,
                    "Verification request matched no record"
                );
            }
            Err(error) => {
                warn!(chat_id = request.chat_id, %error, "Verification store update failed");
            }
        }
    }
}
