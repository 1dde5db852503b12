//! Text message handling: mode switching, quota checks and AI tutoring.

use teloxide::prelude::*;
use teloxide::types::ParseMode;

use super::commands::{handle_profil_command, handle_referal_command, referral_link, PROFILE_BUTTON, REFERRAL_BUTTON};
use super::types::{HandlerDeps, HandlerError, UserInfo};
use crate::ai::ChatMessage;
use crate::core::entitlement::{self, ConsumeOutcome};
use crate::core::session::TutorMode;
use crate::core::config;
use crate::storage::get_connection;
use crate::telegram::gate::ensure_channel_member;

/// Handles a plain text message: keyboard buttons first, then the active
/// tutor mode.
pub async fn handle_text_message(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    // Unknown commands fall through the command filter; not our business
    if text.starts_with('/') {
        return Ok(());
    }

    let user = UserInfo::from_message(msg);
    if !ensure_channel_member(bot, msg.chat.id, UserId(user.user_id as u64)).await? {
        return Ok(());
    }

    // Mode buttons switch the session without costing quota
    if let Some(mode) = TutorMode::from_label(text) {
        deps.sessions.set_mode(user.user_id, mode);
        let confirmation = match mode {
            TutorMode::Chat => "🧠 <b>Chat AI</b> rejimi yoqildi.\n\nSavol bering!",
            TutorMode::Translate => "📘 <b>Tarjima</b> rejimi yoqildi.\n\nMatn yuboring!",
            TutorMode::Speak => "🗣 <b>Speak English</b> rejimi yoqildi.\n\nOvoz xabar yuboring, men tekshiraman!",
        };
        bot.send_message(msg.chat.id, confirmation).parse_mode(ParseMode::Html).await?;
        return Ok(());
    }

    match text {
        PROFILE_BUTTON => return handle_profil_command(bot, msg, deps).await,
        REFERRAL_BUTTON => return handle_referal_command(bot, msg, deps).await,
        _ => {}
    }

    if !consume_or_notify(bot, msg, deps, &user).await? {
        return Ok(());
    }

    let mode = deps.sessions.mode(user.user_id);
    let mut messages = vec![ChatMessage::system(mode.system_prompt())];
    messages.extend(deps.sessions.history(user.user_id));
    messages.push(ChatMessage::user(text));

    match deps
        .ai
        .chat_completion(
            messages,
            &config::ai::CHAT_MODEL,
            config::ai::CHAT_TEMPERATURE,
            config::ai::CHAT_MAX_TOKENS,
        )
        .await
    {
        Ok(answer) => {
            deps.sessions.push_exchange(user.user_id, text, &answer);
            bot.send_message(msg.chat.id, answer).await?;
        }
        Err(e) => {
            log::error!("❌ Chat completion failed for user {}: {}", user.user_id, e);
            bot.send_message(msg.chat.id, "❌ Xatolik yuz berdi. Iltimos, qaytadan urinib ko'ring.")
                .await?;
        }
    }

    Ok(())
}

/// Charges one request against the user's daily quota.
///
/// Returns true when the request may be served. On an exhausted quota the
/// user gets the referral pitch instead. A storage error propagates, which
/// denies the request rather than handing out a free one.
pub(super) async fn consume_or_notify(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
    user: &UserInfo,
) -> Result<bool, HandlerError> {
    let outcome = {
        let conn = get_connection(&deps.db_pool)?;
        entitlement::resolve_user(&conn, user.user_id, user.username.as_deref(), None)?;
        entitlement::try_consume(&conn, user.user_id, *config::quota::FREE_DAILY_LIMIT)?
    };

    match outcome {
        ConsumeOutcome::Entitled | ConsumeOutcome::Counted { .. } => Ok(true),
        ConsumeOutcome::LimitReached { limit } => {
            let link = referral_link(deps.bot_username.as_deref().unwrap_or_default(), user.user_id);
            bot.send_message(
                msg.chat.id,
                format!(
                    "⚠️ <b>Limitingiz tugadi!</b>\n\n\
                     Kunlik limit: <b>0/{}</b>\n\n\
                     ━━━━━━━━━━━━━━━━\n\
                     🎁 <b>Har bir taklif = {} kun PREMIUM</b>\n\n\
                     📨 <b>Sizning havolangiz:</b>\n\
                     <code>{}</code>\n\n\
                     💎 Yoki /premium bilan cheksiz oling\n\
                     ⏰ Yoki ertaga qaytib keling!",
                    limit,
                    *config::referral::BONUS_DAYS,
                    link
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
            Ok(false)
        }
    }
}
