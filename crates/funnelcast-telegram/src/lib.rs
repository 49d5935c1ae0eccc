//! Telegram Bot API transport — long polling in, messages with media and
//! inline keyboards out.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use funnelcast_core::error::{FunnelcastError, Result};
use funnelcast_core::traits::Transport;
use funnelcast_core::types::{BroadcastBody, MediaKind, UrlButton};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Long-poll hold time for getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramBot {
    token: String,
    client: reqwest::Client,
}

impl TelegramBot {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    /// POST a method call and unwrap the API response envelope.
    async fn invoke<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FunnelcastError::Channel(format!("{method} failed: {e}")))?;

        let envelope: TelegramApiResponse<T> = response
            .json()
            .await
            .map_err(|e| FunnelcastError::Channel(format!("Invalid {method} response: {e}")))?;

        if !envelope.ok {
            return Err(FunnelcastError::Channel(format!(
                "{method} error: {}",
                envelope.description.unwrap_or_default()
            )));
        }
        envelope
            .result
            .ok_or_else(|| FunnelcastError::Channel(format!("{method}: empty result")))
    }

    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.invoke("getMe", json!({})).await
    }

    /// Send a text message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<TelegramMessage> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = markup {
            body["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| FunnelcastError::Channel(format!("Bad keyboard: {e}")))?;
        }
        self.invoke("sendMessage", body).await
    }

    /// Send media with a caption. `location` is an HTTP(S) URL or a file id,
    /// the API accepts either in the same field.
    pub async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        location: &str,
        caption: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<TelegramMessage> {
        let (method, field) = match kind {
            MediaKind::Photo => ("sendPhoto", "photo"),
            MediaKind::Video => ("sendVideo", "video"),
            MediaKind::Document => ("sendDocument", "document"),
        };
        let mut body = json!({
            "chat_id": chat_id,
            "caption": caption,
            "parse_mode": "HTML",
        });
        body[field] = json!(location);
        if let Some(markup) = markup {
            body["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| FunnelcastError::Channel(format!("Bad keyboard: {e}")))?;
        }
        self.invoke(method, body).await
    }

    /// Membership status of a user in a chat/channel
    /// ("member", "administrator", "creator", "left", "kicked", ...).
    pub async fn get_chat_member(&self, chat: &str, user_id: i64) -> Result<String> {
        let member: ChatMember = self
            .invoke(
                "getChatMember",
                json!({ "chat_id": chat_id_value(chat), "user_id": user_id }),
            )
            .await?;
        Ok(member.status)
    }

    /// Stop the client-side spinner on a callback button.
    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .invoke(
                "answerCallbackQuery",
                json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .invoke(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("allowed_updates", "[\"message\",\"callback_query\"]".into()),
            ])
            .timeout(REQUEST_TIMEOUT + Duration::from_secs(POLL_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| FunnelcastError::Channel(format!("getUpdates failed: {e}")))?;

        let envelope: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| FunnelcastError::Channel(format!("Invalid getUpdates response: {e}")))?;

        if !envelope.ok {
            return Err(FunnelcastError::Channel(format!(
                "getUpdates error: {}",
                envelope.description.unwrap_or_default()
            )));
        }
        Ok(envelope.result.unwrap_or_default())
    }

    /// Spawn the polling loop; the returned stream yields updates in order.
    pub fn start_polling(self) -> UpdateStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut last_update_id = 0i64;
            tracing::info!("Telegram polling loop started");

            loop {
                match self.get_updates(last_update_id + 1).await {
                    Ok(updates) => {
                        for update in updates {
                            last_update_id = last_update_id.max(update.update_id);
                            if tx.send(update).is_err() {
                                tracing::info!("Telegram polling stopped (receiver dropped)");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Telegram polling error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        UpdateStream { rx }
    }
}

/// Stream of incoming updates from the polling task.
pub struct UpdateStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<TelegramUpdate>,
}

impl Stream for UpdateStream {
    type Item = TelegramUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Unpin for UpdateStream {}

impl UpdateStream {
    pub async fn next_update(&mut self) -> Option<TelegramUpdate> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for TelegramBot {
    async fn send_broadcast(&self, recipient_id: i64, body: &BroadcastBody) -> Result<()> {
        let markup = if body.buttons.is_empty() {
            None
        } else {
            Some(InlineKeyboardMarkup::from_url_buttons(&body.buttons))
        };
        match &body.media {
            Some(media) => {
                self.send_media(
                    recipient_id,
                    media.kind,
                    &media.location,
                    &body.text,
                    markup.as_ref(),
                )
                .await?;
            }
            None => {
                self.send_message(recipient_id, &body.text, markup.as_ref())
                    .await?;
            }
        }
        Ok(())
    }

    async fn check_membership(&self, recipient_id: i64, channel: &str) -> Result<bool> {
        // A user the API cannot see (never interacted with the channel) is
        // simply not a member.
        match self.get_chat_member(channel, recipient_id).await {
            Ok(status) => Ok(matches!(
                status.as_str(),
                "member" | "administrator" | "creator"
            )),
            Err(e) => {
                tracing::debug!("getChatMember for {recipient_id} in {channel}: {e}");
                Ok(false)
            }
        }
    }
}

/// Channel refs arrive as "@name" or a numeric id; the API wants the id as a
/// number.
fn chat_id_value(chat: &str) -> serde_json::Value {
    match chat.parse::<i64>() {
        Ok(id) => json!(id),
        Err(_) => json!(chat),
    }
}

// --- Inline keyboards ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

impl InlineKeyboardButton {
    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: Some(url.into()),
            callback_data: None,
        }
    }

    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: None,
            callback_data: Some(data.into()),
        }
    }
}

impl InlineKeyboardMarkup {
    pub fn rows(rows: Vec<Vec<InlineKeyboardButton>>) -> Self {
        Self {
            inline_keyboard: rows,
        }
    }

    /// One URL button per row, as the broadcast composer lays them out.
    pub fn from_url_buttons(buttons: &[UrlButton]) -> Self {
        Self {
            inline_keyboard: buttons
                .iter()
                .map(|b| vec![InlineKeyboardButton::url(&b.text, &b.url)])
                .collect(),
        }
    }
}

// --- Telegram API types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
}
