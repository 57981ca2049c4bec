//! Common utilities and types shared across the application.

pub mod error;
pub mod messages;
pub mod types;

// Re-export event types from messages module
pub use messages::{MessageEvent, RoleMention, SourceEvent, UserMention, VerifyRequest};
