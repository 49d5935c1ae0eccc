//! Onboarding: /start deep links, the subscription gate, and the captcha.

use funnelcast_core::error::Result;
use funnelcast_core::stage::FunnelStage;
use funnelcast_core::traits::Transport;
use funnelcast_db::ContentSlot;
use funnelcast_telegram::{InlineKeyboardButton, TelegramUser};

use crate::{BotHandler, funnel};

/// Referral tag from a "/start <tag>" deep link.
pub fn parse_start_tag(text: &str) -> Option<&str> {
    text.split_once(' ')
        .map(|(_, tag)| tag.trim())
        .filter(|tag| !tag.is_empty())
}

pub(crate) async fn handle_start(
    handler: &BotHandler,
    from: &TelegramUser,
    chat_id: i64,
    text: &str,
) -> Result<()> {
    let user_id = from.id;
    let tag = parse_start_tag(text);
    tracing::info!(
        "▶️ /start from {user_id} (@{}){}",
        from.username.as_deref().unwrap_or("-"),
        tag.map(|t| format!(", tag '{t}'")).unwrap_or_default()
    );

    handler.db.upsert_user(user_id, from.username.as_deref(), tag)?;
    handler.db.advance(user_id, "start")?;

    // Subscription gate: non-members get the subscribe prompt and stop here.
    if let Some(channel) = &handler.gate_channel
        && !handler.bot.check_membership(user_id, channel).await?
    {
        handler
            .send_slot(chat_id, ContentSlot::SubscribePrompt, Vec::new())
            .await?;
        return Ok(());
    }

    // Returning users who already proved they are human skip the captcha.
    let passed_captcha = handler
        .db
        .stage_of(user_id)?
        .is_some_and(|s| s.priority() >= FunnelStage::CaptchaPassed.priority());
    if passed_captcha {
        handler
            .send_slot(chat_id, ContentSlot::Welcome, funnel::welcome_rows())
            .await?;
        return Ok(());
    }

    send_captcha(handler, user_id, chat_id).await
}

async fn send_captcha(handler: &BotHandler, user_id: i64, chat_id: i64) -> Result<()> {
    let label = handler
        .db
        .get_content(ContentSlot::Captcha)?
        .and_then(|r| r.action_label)
        .unwrap_or_else(|| "✅ I'm human".into());
    let confirm = vec![vec![InlineKeyboardButton::callback(label, funnel::CAPTCHA_OK)]];
    let message_id = handler.send_slot(chat_id, ContentSlot::Captcha, confirm).await?;
    handler.remember_captcha_message(user_id, message_id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_tag() {
        assert_eq!(parse_start_tag("/start summer_promo"), Some("summer_promo"));
        assert_eq!(parse_start_tag("/start"), None);
        assert_eq!(parse_start_tag("/start   "), None);
        assert_eq!(parse_start_tag("/start a b"), Some("a b"));
    }
}
