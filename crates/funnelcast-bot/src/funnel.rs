//! The funnel walk: callback buttons advancing the user stage and sending
//! the next piece of content.

use funnelcast_core::error::Result;
use funnelcast_db::ContentSlot;
use funnelcast_telegram::{InlineKeyboardButton, TelegramCallbackQuery};

use crate::BotHandler;

pub(crate) const CAPTCHA_OK: &str = "captcha_ok";
const BACK_TO_START: &str = "back_to_start";

/// Callback data → (funnel action, content slot to send).
const ACTIONS: [(&str, &str, ContentSlot); 7] = [
    ("answers", "answers_viewed", ContentSlot::Answers),
    ("private_lesson", "private_lesson_viewed", ContentSlot::PrivateLesson),
    ("tariffs", "tariffs_viewed", ContentSlot::Tariffs),
    ("clothes", "clothes_tariff_viewed", ContentSlot::ClothesTariff),
    ("tech", "tech_tariff_viewed", ContentSlot::TechTariff),
    ("pay_clothes", "clothes_payment_clicked", ContentSlot::ClothesPayment),
    ("pay_tech", "tech_payment_clicked", ContentSlot::TechPayment),
];

/// Funnel menu shown with the welcome message.
pub(crate) fn welcome_rows() -> Vec<Vec<InlineKeyboardButton>> {
    vec![
        vec![InlineKeyboardButton::callback("💡 Answers", "answers")],
        vec![InlineKeyboardButton::callback("🎓 Private lesson", "private_lesson")],
        vec![InlineKeyboardButton::callback("💰 Tariffs", "tariffs")],
    ]
}

/// Navigation under each content slot: the next steps down the funnel.
fn next_rows(slot: ContentSlot) -> Vec<Vec<InlineKeyboardButton>> {
    match slot {
        ContentSlot::Answers => vec![
            vec![InlineKeyboardButton::callback("🎓 Private lesson", "private_lesson")],
            vec![InlineKeyboardButton::callback("💰 Tariffs", "tariffs")],
        ],
        ContentSlot::PrivateLesson => vec![vec![InlineKeyboardButton::callback(
            "💰 Tariffs",
            "tariffs",
        )]],
        ContentSlot::Tariffs => vec![vec![
            InlineKeyboardButton::callback("👗 Clothes", "clothes"),
            InlineKeyboardButton::callback("📱 Tech", "tech"),
        ]],
        ContentSlot::ClothesTariff => vec![vec![InlineKeyboardButton::callback(
            "💳 Pay",
            "pay_clothes",
        )]],
        ContentSlot::TechTariff => vec![vec![InlineKeyboardButton::callback(
            "💳 Pay",
            "pay_tech",
        )]],
        _ => vec![vec![InlineKeyboardButton::callback(
            "⬅️ Back to start",
            BACK_TO_START,
        )]],
    }
}

pub(crate) async fn handle_callback(
    handler: &BotHandler,
    callback: TelegramCallbackQuery,
) -> Result<()> {
    let user_id = callback.from.id;
    // Stop the client spinner regardless of what happens next
    if let Err(e) = handler.bot.answer_callback_query(&callback.id).await {
        tracing::debug!("answerCallbackQuery: {e}");
    }

    let Some(data) = callback.data.as_deref() else {
        return Ok(());
    };
    let chat_id = callback
        .message
        .as_ref()
        .map(|m| m.chat.id)
        .unwrap_or(user_id);

    if data == CAPTCHA_OK {
        return handle_captcha_passed(handler, user_id, chat_id).await;
    }
    if data == BACK_TO_START {
        handler.db.touch_activity(user_id)?;
        delete_source_message(handler, &callback).await;
        handler
            .send_slot(chat_id, ContentSlot::Welcome, welcome_rows())
            .await?;
        return Ok(());
    }

    if let Some((_, action, slot)) = ACTIONS.iter().find(|(cb, _, _)| *cb == data) {
        handler.db.advance(user_id, action)?;
        delete_source_message(handler, &callback).await;
        handler.send_slot(chat_id, *slot, next_rows(*slot)).await?;
        return Ok(());
    }

    tracing::debug!("Unknown callback '{data}' from {user_id}");
    Ok(())
}

async fn handle_captcha_passed(handler: &BotHandler, user_id: i64, chat_id: i64) -> Result<()> {
    handler.db.advance(user_id, "captcha_passed")?;
    if let Some(message_id) = handler.take_captcha_message(user_id).await
        && let Err(e) = handler.bot.delete_message(chat_id, message_id).await
    {
        tracing::debug!("Could not delete captcha message: {e}");
    }
    handler
        .send_slot(chat_id, ContentSlot::Welcome, welcome_rows())
        .await?;
    Ok(())
}

/// The funnel replaces the tapped message with the next one.
async fn delete_source_message(handler: &BotHandler, callback: &TelegramCallbackQuery) {
    if let Some(message) = &callback.message
        && let Err(e) = handler
            .bot
            .delete_message(message.chat.id, message.message_id)
            .await
    {
        tracing::debug!("Could not delete message {}: {e}", message.message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnelcast_core::stage::FunnelStage;

    #[test]
    fn test_every_callback_maps_to_a_known_action() {
        for (callback, action, _) in ACTIONS {
            assert!(
                FunnelStage::from_action(action).is_some(),
                "callback '{callback}' maps to unknown action '{action}'"
            );
        }
    }

    #[test]
    fn test_walk_follows_the_funnel_order() {
        // Walking the menu in order never decreases stage priority
        let walk = ["answers", "private_lesson", "tariffs", "clothes", "pay_clothes"];
        let mut last = 0u8;
        for step in walk {
            let (_, action, _) = ACTIONS.iter().find(|(cb, _, _)| *cb == step).unwrap();
            let priority = FunnelStage::from_action(action).unwrap().priority();
            assert!(priority > last, "step '{step}' goes backwards");
            last = priority;
        }
    }
}
