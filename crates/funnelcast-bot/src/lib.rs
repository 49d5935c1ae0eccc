//! Client-side update handling.
//!
//! Routes incoming Telegram updates into the onboarding flow (/start deep
//! links, subscription gate, captcha) and the funnel walk (callback
//! buttons). All copy comes from the typed content slots in the database.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use funnelcast_core::error::Result;
use funnelcast_db::{BotDb, ContentSlot};
use funnelcast_telegram::{
    InlineKeyboardButton, InlineKeyboardMarkup, TelegramBot, TelegramUpdate,
};

mod funnel;
mod onboarding;

pub use onboarding::parse_start_tag;

/// Per-user onboarding state, keyed by user id and owned by the handler.
#[derive(Debug, Default, Clone)]
struct Session {
    /// Captcha prompt message, deleted once the user passes.
    captcha_message_id: Option<i64>,
}

/// The update dispatcher shared by the polling loop.
pub struct BotHandler {
    db: Arc<BotDb>,
    bot: TelegramBot,
    gate_channel: Option<String>,
    sessions: Mutex<HashMap<i64, Session>>,
}

impl BotHandler {
    pub fn new(db: Arc<BotDb>, bot: TelegramBot, gate_channel: Option<String>) -> Self {
        Self {
            db,
            bot,
            gate_channel,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one incoming update. Errors are returned for the caller to
    /// log; one bad update never takes the polling loop down.
    pub async fn handle_update(&self, update: TelegramUpdate) -> Result<()> {
        if let Some(message) = update.message {
            if let Some(from) = &message.from
                && !from.is_bot
                && let Some(text) = &message.text
                && text.starts_with("/start")
            {
                return onboarding::handle_start(self, from, message.chat.id, text).await;
            }
            return Ok(());
        }
        if let Some(callback) = update.callback_query {
            return funnel::handle_callback(self, callback).await;
        }
        Ok(())
    }

    /// Send a content slot to a user: its media/text, the given navigation
    /// rows, then the slot's own URL buttons below them. Returns the sent
    /// message id.
    async fn send_slot(
        &self,
        user_id: i64,
        slot: ContentSlot,
        nav_rows: Vec<Vec<InlineKeyboardButton>>,
    ) -> Result<Option<i64>> {
        let Some(record) = self.db.get_content(slot)? else {
            tracing::warn!("Content slot '{}' is empty; nothing sent", slot.as_str());
            return Ok(None);
        };

        let mut rows = nav_rows;
        for button in &record.buttons {
            rows.push(vec![InlineKeyboardButton::url(&button.text, &button.url)]);
        }
        let markup = if rows.is_empty() {
            None
        } else {
            Some(InlineKeyboardMarkup::rows(rows))
        };

        let sent = match &record.media {
            Some(media) => {
                self.bot
                    .send_media(
                        user_id,
                        media.kind,
                        &media.location,
                        &record.text,
                        markup.as_ref(),
                    )
                    .await?
            }
            None => {
                self.bot
                    .send_message(user_id, &record.text, markup.as_ref())
                    .await?
            }
        };
        Ok(Some(sent.message_id))
    }

    async fn remember_captcha_message(&self, user_id: i64, message_id: Option<i64>) {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(user_id).or_default().captcha_message_id = message_id;
    }

    async fn take_captcha_message(&self, user_id: i64) -> Option<i64> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&user_id).and_then(|s| s.captcha_message_id)
    }
}
