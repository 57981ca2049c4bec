//! Telegram-backed notification sender.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::NotificationSender;
use crate::common::error::SendError;
use crate::common::types::ChatId;
use crate::telegram::api::TelegramApi;

/// Sends rendered notifications over the Telegram Bot API.
///
/// A 403 from the API means the subscriber blocked the bot or deleted the
/// chat; that surfaces as `SendError::Unreachable` so the dispatcher can
/// deregister them.
pub struct TelegramSender {
    api: Arc<TelegramApi>,
}

impl TelegramSender {
    pub fn new(api: Arc<TelegramApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, chat_id: ChatId, text: &str) -> Result<(), SendError> {
        self.api
            .send_message(chat_id, text, None)
            .await
            .map_err(SendError::from)
    }
}
