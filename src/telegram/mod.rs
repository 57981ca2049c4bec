//! Telegram bot integration.
//!
//! A thin Bot API client, the notification sender and the subscriber
//! command dialogue.

pub mod api;
pub mod commands;
pub mod sender;

pub use api::TelegramApi;
pub use commands::Dialogue;
pub use sender::TelegramSender;
