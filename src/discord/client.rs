//! Discord gateway client.
//!
//! Builds the serenity client and normalizes incoming gateway traffic into
//! the bridge's source events, hiding serenity types from the rest of the
//! application.

use std::collections::HashSet;
use std::time::Duration;

use serenity::async_trait;
use serenity::http::HttpBuilder;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use serenity::Client;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::common::messages::{
    MessageEvent, RoleMention, SourceEvent, UserMention, VerifyRequest,
};
use crate::common::types::ChatId;

/// Prefix of the verification command subscribers DM to the bot.
const VERIFY_PREFIX: &str = "!verify";

/// Forwards normalized Discord events to the bridge loop.
pub struct EventForwarder {
    events_tx: mpsc::UnboundedSender<SourceEvent>,
    /// Channels whose every message goes out to all subscribers.
    broadcast_channels: HashSet<u64>,
}

impl EventForwarder {
    pub fn new(events_tx: mpsc::UnboundedSender<SourceEvent>, broadcast_channels: &[u64]) -> Self {
        Self {
            events_tx,
            broadcast_channels: broadcast_channels.iter().copied().collect(),
        }
    }

    /// Handle a DM. Only the verification command is recognized.
    async fn handle_direct_message(&self, context: Context, message: Message) {
        let content = message.content.trim();
        let rest = match content.strip_prefix(VERIFY_PREFIX) {
            Some(rest) => rest,
            None => return,
        };

        let reply = match rest.trim().parse::<ChatId>() {
            Ok(chat_id) => {
                let request = VerifyRequest {
                    chat_id,
                    discord_username: message.author.name.clone(),
                };
                if let Err(error) = self.events_tx.send(SourceEvent::Verify(request)) {
                    warn!("Failed to forward verification request: {}", error);
                    return;
                }
                "Thanks! If that Telegram chat has your username set up, \
                 notifications are now active."
            }
            Err(_) => "Usage: !verify <telegram-chat-id>",
        };

        if let Err(error) = message.channel_id.say(&context.http, reply).await {
            warn!("Failed to reply to verification message: {}", error);
        }
    }
}

#[async_trait]
impl EventHandler for EventForwarder {
    async fn ready(&self, _context: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);
    }

    async fn message(&self, context: Context, message: Message) {
        // Nothing from bots, including our own echo.
        if message.author.bot {
            return;
        }

        let guild_id = match message.guild_id {
            Some(id) => id,
            None => {
                self.handle_direct_message(context, message).await;
                return;
            }
        };

        if message.content.is_empty() {
            debug!("Skipping message without text content");
            return;
        }

        let broadcast = self.broadcast_channels.contains(&message.channel_id.get());
        let event = normalize_message(&context.cache, guild_id, &message, broadcast);

        if let Err(error) = self.events_tx.send(SourceEvent::Message(event)) {
            warn!("Failed to forward discord event: {}", error);
        }
    }
}

/// Flatten a guild message into the bridge's event type.
///
/// Mentions are enriched from the cache so routing can match nicknames and
/// role names without holding serenity types.
fn normalize_message(
    cache: &serenity::cache::Cache,
    guild_id: serenity::model::id::GuildId,
    message: &Message,
    broadcast: bool,
) -> MessageEvent {
    let mut channel_name = message.channel_id.get().to_string();
    let mut user_mentions: Vec<UserMention> = message
        .mentions
        .iter()
        .map(|user| UserMention {
            id: user.id.get(),
            username: user.name.clone(),
            nickname: None,
        })
        .collect();
    let mut role_mentions = Vec::new();

    if let Some(guild) = cache.guild(guild_id) {
        if let Some(channel) = guild.channels.get(&message.channel_id) {
            channel_name = channel.name.clone();
        }
        for mention in &mut user_mentions {
            let user_id = serenity::model::id::UserId::new(mention.id);
            if let Some(member) = guild.members.get(&user_id) {
                mention.nickname = member.nick.clone();
            }
        }
        for role_id in &message.mention_roles {
            match guild.roles.get(role_id) {
                Some(role) => role_mentions.push(RoleMention {
                    id: role_id.get(),
                    name: role.name.clone(),
                }),
                None => debug!(role_id = role_id.get(), "Mentioned role not in cache"),
            }
        }
    } else {
        debug!(guild_id = guild_id.get(), "Guild not in cache");
    }

    let author_name = message
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .unwrap_or_else(|| message.author.name.clone());

    MessageEvent {
        guild_id: guild_id.get(),
        channel_id: message.channel_id.get(),
        channel_name,
        author_name,
        content: message.content.clone(),
        permalink: message.link(),
        user_mentions,
        role_mentions,
        mentions_everyone: message.mention_everyone,
        broadcast,
    }
}

/// Build the serenity client with the forwarder installed.
pub async fn build_client(token: &str, forwarder: EventForwarder) -> anyhow::Result<Client> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::DIRECT_MESSAGES;

    // Build a custom reqwest client with timeout settings
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let http = HttpBuilder::new(token).client(reqwest_client).build();

    let client = serenity::client::ClientBuilder::new_with_http(http, intents)
        .event_handler(forwarder)
        .await?;
    Ok(client)
}
