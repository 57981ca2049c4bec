//! Discord gateway integration.
//!
//! The serenity client, the event forwarder feeding the bridge loop, and
//! cache-backed entity resolution.

pub mod client;
pub mod resolver;

// Re-export main types for external use
pub use client::{build_client, EventForwarder};
pub use resolver::{allowed_text_channels, CacheResolver};
