//! Required-channel gate
//!
//! The bot can require users to join a channel before talking to it. The
//! gate is disabled when no channel is configured. A failed membership
//! lookup counts as "not a member": better to show the join prompt once too
//! often than to hand out free usage while the API is flaky.

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};

use crate::core::config;

pub const CHECK_SUBSCRIPTION_CALLBACK: &str = "check_subscription";

/// Checks whether the user is a member of the required channel.
///
/// Always true when the gate is disabled.
pub async fn is_channel_member(bot: &Bot, user_id: UserId) -> Result<bool, teloxide::RequestError> {
    let channel_id = *config::channel::REQUIRED_CHANNEL_ID;
    if channel_id == 0 {
        return Ok(true);
    }

    let member = bot.get_chat_member(ChatId(channel_id), user_id).await?;
    Ok(member.kind.is_present())
}

/// Keyboard with the join link and the re-check button.
pub fn subscribe_keyboard() -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();

    if let Some(link) = config::channel::INVITE_LINK.as_ref() {
        match url::Url::parse(link) {
            Ok(invite_url) => rows.push(vec![InlineKeyboardButton::url("📢 Kanalga a'zo bo'lish", invite_url)]),
            Err(e) => log::warn!("Invalid CHANNEL_INVITE_LINK, hiding join button: {}", e),
        }
    }

    rows.push(vec![InlineKeyboardButton::callback(
        "✅ A'zo bo'ldim",
        CHECK_SUBSCRIPTION_CALLBACK,
    )]);

    InlineKeyboardMarkup::new(rows)
}

/// Lets the update through if the user is a channel member, otherwise sends
/// the join prompt and returns false.
pub async fn ensure_channel_member(bot: &Bot, chat_id: ChatId, user_id: UserId) -> Result<bool, teloxide::RequestError> {
    let is_member = match is_channel_member(bot, user_id).await {
        Ok(is_member) => is_member,
        Err(e) => {
            log::error!("Failed to check channel membership for user {}: {}", user_id, e);
            false
        }
    };

    if is_member {
        return Ok(true);
    }

    bot.send_message(
        chat_id,
        "⚠️ <b>Botdan foydalanish uchun kanalimizga a'zo bo'ling!</b>\n\n\
         Kanalga a'zo bo'lgandan keyin \"✅ A'zo bo'ldim\" tugmasini bosing.",
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(subscribe_keyboard())
    .await?;

    Ok(false)
}

/// Handles the "✅ A'zo bo'ldim" button press.
pub async fn handle_subscription_callback(bot: &Bot, q: CallbackQuery) -> Result<(), teloxide::RequestError> {
    let is_member = match is_channel_member(bot, q.from.id).await {
        Ok(is_member) => is_member,
        Err(e) => {
            log::error!("Failed to re-check channel membership for user {}: {}", q.from.id, e);
            false
        }
    };

    if is_member {
        if let Some(message) = q.message {
            bot.edit_message_text(
                message.chat().id,
                message.id(),
                "✅ <b>Rahmat!</b> Endi botdan foydalanishingiz mumkin.\n\n/start buyrug'ini bosing.",
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        bot.answer_callback_query(q.id).text("✅ A'zolik tasdiqlandi!").await?;
    } else {
        bot.answer_callback_query(q.id)
            .text("❌ Siz hali kanalga a'zo bo'lmadingiz!")
            .show_alert(true)
            .await?;
    }

    Ok(())
}
