//! Minimal Telegram Bot API client.
//!
//! Covers the three methods the bridge needs: `sendMessage` for outbound
//! notifications, `getUpdates` long polling for the command dialogue and
//! `getMe` as a startup sanity check.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::common::error::{TelegramError, TelegramResult};
use crate::common::types::ChatId;

/// Extra headroom over the long-poll timeout before reqwest gives up.
const HTTP_TIMEOUT_MARGIN_SECS: u64 = 30;

/// Telegram Bot API client bound to one bot token.
pub struct TelegramApi {
    http: reqwest::Client,
    base_url: String,
}

/// Envelope every Bot API response arrives in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

/// One entry from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

/// Inbound message, reduced to the fields the dialogue consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

/// `getMe` result.
#[derive(Debug, Clone, Deserialize)]
pub struct BotProfile {
    pub id: i64,
    pub username: Option<String>,
}

impl TelegramApi {
    /// Create a client for the given API base and bot token.
    ///
    /// The HTTP timeout leaves room for the `getUpdates` long poll, which
    /// holds the connection open for up to `poll_timeout_secs`.
    pub fn new(base_url: &str, token: &str, poll_timeout_secs: u64) -> TelegramResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                poll_timeout_secs + HTTP_TIMEOUT_MARGIN_SECS,
            ))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
        })
    }

    /// Send a text message to one chat.
    ///
    /// Always uses HTML parse mode with link previews disabled, the only
    /// shape the bridge emits.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_markup: Option<serde_json::Value>,
    ) -> TelegramResult<()> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup;
        }

        // The API echoes the sent message back; nothing in it is needed.
        self.call::<serde_json::Value>("sendMessage", &payload)
            .await?;
        Ok(())
    }

    /// Long-poll for new updates past `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> TelegramResult<Vec<Update>> {
        let mut payload = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }

        self.call("getUpdates", &payload).await
    }

    /// Fetch the bot's own profile. Fails fast on a bad token.
    pub async fn get_me(&self) -> TelegramResult<BotProfile> {
        self.call("getMe", &json!({})).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> TelegramResult<T> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(payload)
            .send()
            .await?
            .json::<ApiResponse<T>>()
            .await?;

        decode(response)
    }
}

/// Unwrap the Bot API envelope into a result or an API error.
fn decode<T>(response: ApiResponse<T>) -> TelegramResult<T> {
    if response.ok {
        response
            .result
            .ok_or_else(|| TelegramError::UnexpectedResponse {
                message: "ok response without result".to_string(),
            })
    } else {
        Err(TelegramError::Api {
            code: response.error_code.unwrap_or(0),
            description: response
                .description
                .unwrap_or_else(|| "no description".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ok_response() {
        let response: ApiResponse<BotProfile> = serde_json::from_str(
            r#"{"ok": true, "result": {"id": 42, "username": "herald_bot"}}"#,
        )
        .unwrap();

        let profile = decode(response).unwrap();
        assert_eq!(profile.id, 42);
        assert_eq!(profile.username.as_deref(), Some("herald_bot"));
    }

    #[test]
    fn test_decode_error_response() {
        let response: ApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked by the user"}"#,
        )
        .unwrap();

        let error = decode(response).unwrap_err();
        assert!(error.is_unreachable());
        assert!(error.to_string().contains("blocked"));
    }

    #[test]
    fn test_decode_ok_without_result() {
        let response: ApiResponse<BotProfile> =
            serde_json::from_str(r#"{"ok": true}"#).unwrap();

        assert!(matches!(
            decode(response),
            Err(TelegramError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_update_deserialization() {
        let updates: Vec<Update> = serde_json::from_str(
            r#"[
                {"update_id": 7, "message": {"chat": {"id": 100}, "text": "/start"}},
                {"update_id": 8, "message": {"chat": {"id": 100}}},
                {"update_id": 9}
            ]"#,
        )
        .unwrap();

        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].update_id, 7);
        assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 100);
        assert_eq!(
            updates[0].message.as_ref().unwrap().text.as_deref(),
            Some("/start")
        );
        assert!(updates[1].message.as_ref().unwrap().text.is_none());
        assert!(updates[2].message.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = TelegramApi::new("https://api.telegram.org/", "TOKEN", 60).unwrap();
        assert_eq!(api.base_url, "https://api.telegram.org/botTOKEN");
    }
}
