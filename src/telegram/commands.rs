//! Telegram command dialogue.
//!
//! The onboarding conversation: a reply-keyboard menu for picking which
//! Discord handle, roles and channels to watch, plus data wipe and summary
//! commands. Every accepted value is persisted to the store and the
//! notification registry is rebuilt immediately.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use serenity::cache::Cache;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::bridge::render::escape_markup;
use crate::bridge::SharedRegistry;
use crate::common::types::{ChatId, SubscriberRecord};
use crate::config::types::Config;
use crate::discord::resolver::allowed_text_channels;
use crate::store::SubscriberStore;
use crate::telegram::api::{TelegramApi, Update};

const BTN_HANDLE: &str = "Discord handle";
const BTN_CHANNELS: &str = "Discord channels";
const BTN_ROLES: &str = "Discord roles";
const BTN_GUILD: &str = "Discord guild";
const BTN_DELETE: &str = "Delete my data";
const BTN_DONE: &str = "Done";

/// Which value the next plain-text message from a chat is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Handle,
    Roles,
    Channels,
    Guild,
}

/// Per-chat conversation position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialogueState {
    /// Showing the menu, waiting for a category pick.
    Choosing,
    /// A category was picked; the next message carries its value.
    Awaiting(Field),
}

/// Keyboard to attach to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyboard {
    Menu,
    Remove,
    None,
}

struct Reply {
    text: String,
    keyboard: Keyboard,
}

impl Reply {
    fn with_menu(text: String) -> Self {
        Self {
            text,
            keyboard: Keyboard::Menu,
        }
    }

    fn plain(text: String) -> Self {
        Self {
            text,
            keyboard: Keyboard::None,
        }
    }

    fn removing_keyboard(text: String) -> Self {
        Self {
            text,
            keyboard: Keyboard::Remove,
        }
    }

    fn markup(&self) -> Option<serde_json::Value> {
        match self.keyboard {
            Keyboard::Menu => Some(menu_keyboard()),
            Keyboard::Remove => Some(json!({ "remove_keyboard": true })),
            Keyboard::None => None,
        }
    }
}

fn menu_keyboard() -> serde_json::Value {
    json!({
        "keyboard": [
            [BTN_HANDLE, BTN_CHANNELS],
            [BTN_ROLES, BTN_GUILD],
            [BTN_DELETE, BTN_DONE]
        ],
        "one_time_keyboard": true,
        "resize_keyboard": true
    })
}

/// Dialogue logic without the transport: consumes one inbound text,
/// mutates store and registry, and produces the reply to send back.
struct DialogueCore {
    store: Arc<SubscriberStore>,
    registry: SharedRegistry,
    default_guild: Option<u64>,
    allowed_categories: Vec<u64>,
    cache: Option<Arc<Cache>>,
    states: Mutex<HashMap<ChatId, DialogueState>>,
}

impl DialogueCore {
    async fn handle_text(&self, chat_id: ChatId, text: &str) -> Reply {
        let text = text.trim();
        match text {
            "/start" | "/menu" | "/back" => {
                self.set_state(chat_id, DialogueState::Choosing).await;
                self.greeting(chat_id).await
            }
            "/show_data" => {
                let record = self.store.get(chat_id).await;
                Reply::plain(format!(
                    "This is what you already told me:\n{}",
                    summarize(record.as_ref())
                ))
            }
            _ => {
                let state = self
                    .states
                    .lock()
                    .await
                    .get(&chat_id)
                    .copied()
                    .unwrap_or(DialogueState::Choosing);
                match state {
                    DialogueState::Choosing => self.choose(chat_id, text).await,
                    DialogueState::Awaiting(field) => {
                        self.accept_value(chat_id, field, text).await
                    }
                }
            }
        }
    }

    async fn set_state(&self, chat_id: ChatId, state: DialogueState) {
        self.states.lock().await.insert(chat_id, state);
    }

    async fn greeting(&self, chat_id: ChatId) -> Reply {
        let record = self.store.get(chat_id).await;
        let text = match record.as_ref().filter(|r| !r.is_empty()) {
            Some(record) => format!(
                "Hello!\nYour data so far:\n{}\nPlease choose:",
                summarize(Some(record))
            ),
            None => concat!(
                "Hello!\n",
                "To receive a notification whenever your Discord handle is mentioned, ",
                "please select 'Discord handle' from the menu below. ",
                "To restrict notifications to certain channels only, ",
                "select 'Discord channels'. ",
                "To receive notifications for mentions of specific roles, ",
                "select 'Discord roles'."
            )
            .to_string(),
        };
        Reply::with_menu(text)
    }

    async fn choose(&self, chat_id: ChatId, text: &str) -> Reply {
        match text {
            BTN_HANDLE => {
                self.set_state(chat_id, DialogueState::Awaiting(Field::Handle))
                    .await;
                Reply::plain(format!(
                    "Please enter your Discord username (i.e. {}). You can find it by \
                     tapping your avatar or under Settings, My Account, Username.",
                    example_handle()
                ))
            }
            BTN_ROLES => {
                self.set_state(chat_id, DialogueState::Awaiting(Field::Roles))
                    .await;
                Reply::plain(
                    "Which roles should notify you when they are mentioned? \
                     Enter a comma-separated list (i.e. admin, moderator)."
                        .to_string(),
                )
            }
            BTN_CHANNELS => {
                self.set_state(chat_id, DialogueState::Awaiting(Field::Channels))
                    .await;
                Reply::plain(self.channels_prompt(chat_id).await)
            }
            BTN_GUILD => {
                self.set_state(chat_id, DialogueState::Awaiting(Field::Guild))
                    .await;
                Reply::plain(
                    "Please enter the id of the Discord server to watch. You can copy \
                     it by right-clicking the server icon with developer mode enabled."
                        .to_string(),
                )
            }
            BTN_DELETE => self.delete_data(chat_id).await,
            BTN_DONE => {
                self.states.lock().await.remove(&chat_id);
                let record = self.store.get(chat_id).await;
                Reply::removing_keyboard(format!(
                    "Your data so far:\n{}\nHit /menu to edit.",
                    summarize(record.as_ref())
                ))
            }
            _ => self.greeting(chat_id).await,
        }
    }

    async fn channels_prompt(&self, chat_id: ChatId) -> String {
        let mut prompt = String::from(
            "Which channels should notifications be restricted to? \
             Enter a comma-separated list (i.e. general, announcements).",
        );

        let guild_id = match self.watched_guild(chat_id).await {
            Some(id) => id,
            None => return prompt,
        };
        if let Some(cache) = self.cache.as_deref() {
            let channels = allowed_text_channels(cache, guild_id, &self.allowed_categories);
            if !channels.is_empty() {
                prompt.push_str("\n\nAvailable channels:\n");
                prompt.push_str(&escape_markup(&channels.join("\n")));
            }
        }
        prompt
    }

    async fn watched_guild(&self, chat_id: ChatId) -> Option<u64> {
        match self.store.get(chat_id).await.and_then(|r| r.guild_id) {
            Some(id) => Some(id),
            None => self.default_guild,
        }
    }

    async fn delete_data(&self, chat_id: ChatId) -> Reply {
        let record = self.store.get(chat_id).await;
        if record.map(|r| r.is_empty()).unwrap_or(true) {
            return Reply::with_menu(
                "There's nothing here to be deleted yet! Back to /menu".to_string(),
            );
        }

        match self.store.wipe(chat_id).await {
            Ok(()) => {
                self.refresh_registry().await;
                info!(chat_id, "Subscriber data wiped");
                Reply::with_menu("Data successfully wiped!".to_string())
            }
            Err(error) => {
                warn!(chat_id, "Failed to wipe subscriber data: {}", error);
                Reply::with_menu("Something went wrong, please try again.".to_string())
            }
        }
    }

    async fn accept_value(&self, chat_id: ChatId, field: Field, text: &str) -> Reply {
        let default_guild = self.default_guild;
        let result = match field {
            Field::Handle => {
                let handle = text.to_lowercase();
                self.store
                    .update(chat_id, |record| {
                        if record.guild_id.is_none() {
                            record.guild_id = default_guild;
                        }
                        // A changed handle needs a fresh verification.
                        if record.discord_handle.as_deref() != Some(handle.as_str()) {
                            record.verified = false;
                        }
                        record.discord_handle = Some(handle);
                    })
                    .await
            }
            Field::Roles => {
                let roles = parse_name_list(text);
                self.store
                    .update(chat_id, |record| {
                        if record.guild_id.is_none() {
                            record.guild_id = default_guild;
                        }
                        record.discord_roles = roles;
                    })
                    .await
            }
            Field::Channels => {
                let channels = parse_name_list(text);
                self.store
                    .update(chat_id, |record| {
                        if record.guild_id.is_none() {
                            record.guild_id = default_guild;
                        }
                        record.channels = channels;
                    })
                    .await
            }
            Field::Guild => {
                let guild: u64 = match text.parse() {
                    Ok(id) => id,
                    Err(_) => {
                        return Reply::plain(
                            "That doesn't look like a server id. Please enter a number."
                                .to_string(),
                        );
                    }
                };
                self.store
                    .update(chat_id, |record| {
                        record.guild_id = Some(guild);
                    })
                    .await
            }
        };

        match result {
            Ok(record) => {
                self.refresh_registry().await;
                self.set_state(chat_id, DialogueState::Choosing).await;

                let mut reply = format!(
                    "Success! Your data so far:\n{}\nHit /menu to edit.",
                    summarize(Some(&record))
                );
                if field == Field::Handle && !record.verified {
                    reply.push_str(&format!(
                        "\nTo activate mention notifications, verify the handle by \
                         sending the Discord bot a direct message: !verify {}",
                        chat_id
                    ));
                }
                Reply::with_menu(reply)
            }
            Err(error) => {
                warn!(chat_id, "Failed to save subscriber data: {}", error);
                Reply::plain("Something went wrong, please try again.".to_string())
            }
        }
    }

    async fn refresh_registry(&self) {
        self.registry.install(self.store.load_all().await);
    }
}

/// Format stored preferences as "key - value" lines, non-empty values only.
fn summarize(record: Option<&SubscriberRecord>) -> String {
    let record = match record {
        Some(record) if !record.is_empty() => record,
        _ => return "(nothing yet)".to_string(),
    };

    let mut lines = Vec::new();
    if let Some(handle) = record.discord_handle.as_deref() {
        lines.push(format!("discord handle - {}", escape_markup(handle)));
    }
    if !record.discord_roles.is_empty() {
        lines.push(format!(
            "discord roles - {}",
            escape_markup(&join_names(&record.discord_roles))
        ));
    }
    if !record.channels.is_empty() {
        lines.push(format!(
            "discord channels - {}",
            escape_markup(&join_names(&record.channels))
        ));
    }
    if let Some(guild) = record.guild_id {
        lines.push(format!("discord guild - {}", guild));
    }
    if record.verified {
        lines.push("verified - yes".to_string());
    }
    lines.join("\n")
}

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(", ")
}

/// Split a comma-separated list into lowercased names.
///
/// A leading '#' is stripped so pasted channel names work as-is.
fn parse_name_list(text: &str) -> BTreeSet<String> {
    text.split(',')
        .map(|part| part.trim().trim_start_matches('#').to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Example username for the handle prompt, randomized like a real one.
fn example_handle() -> String {
    let mut rng = rand::thread_rng();
    let name = ["Tom", "Anna", "Mia", "Max"]
        .choose(&mut rng)
        .copied()
        .unwrap_or("Tom");
    format!("{}#{}", name, rng.gen_range(100..=999))
}

/// Backoff for getUpdates failures. 2s initial, 1min max, with jitter,
/// unlimited retries.
fn poll_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(2))
        .with_max_delay(Duration::from_secs(60))
        .with_factor(2.0)
        .with_jitter()
        .without_max_times()
        .build()
}

/// Long-polls Telegram for subscriber messages and drives the menu
/// conversation.
pub struct Dialogue {
    api: Arc<TelegramApi>,
    core: DialogueCore,
    poll_timeout_secs: u64,
}

impl Dialogue {
    pub fn new(
        api: Arc<TelegramApi>,
        store: Arc<SubscriberStore>,
        registry: SharedRegistry,
        cache: Arc<Cache>,
        config: &Config,
    ) -> Self {
        Self {
            api,
            core: DialogueCore {
                store,
                registry,
                default_guild: config.discord.default_guild,
                allowed_categories: config.discord.allowed_channel_categories().to_vec(),
                cache: Some(cache),
                states: Mutex::new(HashMap::new()),
            },
            poll_timeout_secs: config.telegram.poll_timeout_secs(),
        }
    }

    /// Poll for updates until the shutdown signal fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut offset = None;
        let mut backoff = poll_backoff();

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                result = self.api.get_updates(offset, self.poll_timeout_secs) => match result {
                    Ok(updates) => {
                        backoff = poll_backoff();
                        for update in updates {
                            offset = Some(update.update_id + 1);
                            self.process_update(update).await;
                        }
                    }
                    Err(error) => {
                        let delay = backoff.next().unwrap_or(Duration::from_secs(60));
                        warn!(
                            "Telegram poll failed: {}. Retrying in {:.1}s...",
                            error,
                            delay.as_secs_f64()
                        );
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
        info!("Telegram dialogue task ended");
    }

    async fn process_update(&self, update: Update) {
        let message = match update.message {
            Some(message) => message,
            None => return,
        };
        let text = match message.text {
            Some(text) => text,
            None => return,
        };

        let chat_id = message.chat.id;
        debug!(chat_id, text = %text, "Dialogue message received");

        let reply = self.core.handle_text(chat_id, &text).await;
        if let Err(error) = self
            .api
            .send_message(chat_id, &reply.text, reply.markup())
            .await
        {
            warn!(chat_id, "Failed to send dialogue reply: {}", error);
        }
    }
}
