//! Notification delivery.
//!
//! Renders each event once, fans the sends out concurrently, and reacts to
//! per-recipient outcomes: unreachable chats are deregistered and trigger
//! one registry refresh, any other failure is logged and isolated.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::bridge::registry::SharedRegistry;
use crate::bridge::render::{compose_notification, EntityResolver, MessageRenderer};
use crate::bridge::router::DeliveryTarget;
use crate::common::error::SendError;
use crate::common::messages::MessageEvent;
use crate::common::types::ChatId;
use crate::store::SubscriberStore;

/// Transport over which notifications leave the process.
///
/// The production implementation talks to the Telegram Bot API; tests
/// record what would have been sent.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, chat_id: ChatId, text: &str) -> Result<(), SendError>;
}

pub struct Dispatcher {
    renderer: MessageRenderer,
    sender: Arc<dyn NotificationSender>,
    store: Arc<SubscriberStore>,
    registry: SharedRegistry,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        store: Arc<SubscriberStore>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            renderer: MessageRenderer::new(),
            sender,
            store,
            registry,
        }
    }

    /// Deliver an event to its routed targets.
    ///
    /// The body is rendered once per event; each target gets its own header
    /// and framing. All sends for the event complete before this returns.
    pub async fn deliver(
        &self,
        event: &MessageEvent,
        targets: &[DeliveryTarget],
        resolver: &dyn EntityResolver,
    ) {
        if targets.is_empty() {
            return;
        }

        let rendered = self.renderer.render(&event.content, resolver);
        for error in &rendered.errors {
            warn!(channel = %event.channel_name, %error, "Mention resolution failed");
        }

        let sends = targets.iter().map(|target| {
            let chat_id = target.chat_id;
            let text = compose_notification(&target.header, &rendered.text);
            let sender = &self.sender;
            async move { (chat_id, sender.send(chat_id, &text).await) }
        });
        let results = join_all(sends).await;

        let mut delivered = 0usize;
        let mut unreachable: BTreeSet<ChatId> = BTreeSet::new();
        for (chat_id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(SendError::Unreachable { reason }) => {
                    info!(chat_id, %reason, "Recipient unreachable, deregistering");
                    unreachable.insert(chat_id);
                }
                Err(SendError::Other { reason }) => {
                    warn!(chat_id, %reason, "Notification send failed");
                }
            }
        }

        debug!(
            delivered,
            targets = targets.len(),
            channel = %event.channel_name,
            "Event dispatched"
        );

        if !unreachable.is_empty() {
            self.deregister(&unreachable).await;
        }
    }

    /// Drop unreachable chats from the store, then refresh the registry once.
    async fn deregister(&self, chats: &BTreeSet<ChatId>) {
        for &chat_id in chats {
            match self.store.delete(chat_id).await {
                Ok(true) => debug!(chat_id, "Subscriber record removed"),
                Ok(false) => debug!(chat_id, "Subscriber record was already gone"),
                Err(error) => warn!(chat_id, %error, "Failed to remove subscriber record"),
            }
        }
        self.registry.install(self.store.load_all().await);
    }
}
