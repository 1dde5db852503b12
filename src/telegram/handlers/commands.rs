//! Command handlers: /start with referral deep links, info commands and
//! the admin commands.

use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{KeyboardButton, KeyboardMarkup, ParseMode};
use teloxide::utils::html;

use super::types::{HandlerDeps, HandlerError, UserInfo};
use crate::core::session::TutorMode;
use crate::core::{config, entitlement};
use crate::storage::db;
use crate::storage::get_connection;
use crate::telegram::gate::ensure_channel_member;
use crate::telegram::notifications::{notify_admin_new_user, notify_referrer_credited};

/// Keyboard button that opens the profile card
pub const PROFILE_BUTTON: &str = "👤 Profil";

/// Keyboard button that shows the referral link
pub const REFERRAL_BUTTON: &str = "🔗 Referal";

/// Main reply keyboard: the three tutor modes plus profile and referral.
pub fn main_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(TutorMode::Chat.label()),
            KeyboardButton::new(TutorMode::Translate.label()),
        ],
        vec![KeyboardButton::new(TutorMode::Speak.label())],
        vec![KeyboardButton::new(PROFILE_BUTTON), KeyboardButton::new(REFERRAL_BUTTON)],
        vec![KeyboardButton::new("/help")],
    ])
    .resize_keyboard()
}

/// Deep link that credits this user when a friend joins through it.
pub fn referral_link(bot_username: &str, user_id: i64) -> String {
    format!("https://t.me/{}?start={}", bot_username, user_id)
}

/// Handles /start, including the referral payload from deep links.
pub async fn handle_start_command(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
    payload: &str,
) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);

    if !ensure_channel_member(bot, msg.chat.id, UserId(user.user_id as u64)).await? {
        return Ok(());
    }

    // The deep-link payload carries the referrer's user id
    let referrer = payload.trim().parse::<i64>().ok();

    // Scope the pooled connection so it is back in the pool before we talk
    // to Telegram
    let (resolved, referrer_notice) = {
        let conn = get_connection(&deps.db_pool)?;
        let resolved = entitlement::resolve_user(&conn, user.user_id, user.username.as_deref(), referrer)?;

        let referrer_notice = match resolved.credited_referrer {
            Some(referrer_id) => db::get_user(&conn, referrer_id)?
                .and_then(|r| {
                    r.premium_until
                        .as_deref()
                        .and_then(entitlement::parse_premium_until)
                        .map(|until| (referrer_id, r.referral_count, until))
                }),
            None => None,
        };
        (resolved, referrer_notice)
    };

    if resolved.created {
        log::info!(
            "🎯 New user {} (@{})",
            user.user_id,
            user.username.as_deref().unwrap_or("-")
        );

        let bot_notify = bot.clone();
        let (user_id, username, first_name) = (user.user_id, user.username.clone(), user.first_name.clone());
        tokio::spawn(async move {
            notify_admin_new_user(&bot_notify, user_id, username.as_deref(), first_name.as_deref()).await;
        });
    }

    if let Some((referrer_id, referral_count, premium_until)) = referrer_notice {
        notify_referrer_credited(bot, referrer_id, user.display_name(), referral_count, premium_until).await;
    }

    // A fresh /start drops the user back into chat mode
    deps.sessions.set_mode(user.user_id, TutorMode::Chat);

    bot.send_message(
        msg.chat.id,
        format!(
            "👋 <b>Salom, {}!</b>\n\n\
             🤖 <b>AI English Learning Bot</b>\n\n\
             🧠 Chat AI — savol-javob\n\
             📘 Tarjima — matn tarjimasi\n\
             🗣 Speak English — gapirib o'rganish\n\
             👤 Profil — limit va premium\n\
             🔗 Referal — do'stlarni taklif qiling\n\n\
             👇 <b>Rejimni tanlang:</b>",
            html::escape(user.display_name())
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(main_keyboard())
    .await?;

    Ok(())
}

/// Handles /help.
pub async fn handle_help_command(bot: &Bot, msg: &Message) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    if !ensure_channel_member(bot, msg.chat.id, UserId(user.user_id as u64)).await? {
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        format!(
            "ℹ️ <b>YORDAM</b>\n\n\
             🧠 <b>Chat AI</b> — ingliz tili bo'yicha savol-javob\n\
             📘 <b>Tarjima</b> — matnlarni tarjima qilish\n\
             🗣 <b>Speak English</b> — ovoz yuborib mashq qilish\n\n\
             📸 <b>Rasm</b> yuborsangiz — tarjima qilinadi\n\
             🎤 <b>Ovoz</b> yuborsangiz — tekshiriladi\n\n\
             ━━━━━━━━━━━━━━━━\n\
             💎 <b>PREMIUM OLISH:</b>\n\
             🔗 /referal — har bir do'st uchun {} kun premium\n\
             ⭐ /premium — Telegram Stars bilan {} kun",
            *config::referral::BONUS_DAYS,
            config::premium::PAID_DAYS
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;

    Ok(())
}

/// Handles /referal and the 🔗 keyboard button.
pub async fn handle_referal_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    if !ensure_channel_member(bot, msg.chat.id, UserId(user.user_id as u64)).await? {
        return Ok(());
    }

    let record = {
        let conn = get_connection(&deps.db_pool)?;
        entitlement::resolve_user(&conn, user.user_id, user.username.as_deref(), None)?.user
    };

    let status = if entitlement::is_entitled(record.premium_until.as_deref(), Utc::now()) {
        "💎 PREMIUM"
    } else {
        "🆓 FREE"
    };
    let link = referral_link(deps.bot_username.as_deref().unwrap_or_default(), user.user_id);

    bot.send_message(
        msg.chat.id,
        format!(
            "🔗 <b>REFERAL DASTURI</b>\n\n\
             📊 Sizning referallaringiz: <b>{}</b>\n\
             🎁 Har bir do'st = <b>{} kun PREMIUM</b>\n\
             📌 Status: {}\n\n\
             ━━━━━━━━━━━━━━━━\n\
             📨 <b>Sizning havolangiz:</b>\n\
             <code>{}</code>\n\n\
             ☝️ Bu havolani do'stlaringizga yuboring!",
            record.referral_count,
            *config::referral::BONUS_DAYS,
            status,
            link
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;

    Ok(())
}

/// Handles /profil and the 👤 keyboard button.
pub async fn handle_profil_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    if !ensure_channel_member(bot, msg.chat.id, UserId(user.user_id as u64)).await? {
        return Ok(());
    }

    let record = {
        let conn = get_connection(&deps.db_pool)?;
        entitlement::resolve_user(&conn, user.user_id, user.username.as_deref(), None)?;
        // Roll the day over so the card shows fresh numbers
        entitlement::check_and_reset(&conn, user.user_id)?;
        db::get_user(&conn, user.user_id)?
            .ok_or_else(|| format!("user {} vanished from the ledger", user.user_id))?
    };

    let limit = *config::quota::FREE_DAILY_LIMIT;
    let (status_text, limit_text) = match record
        .premium_until
        .as_deref()
        .and_then(entitlement::parse_premium_until)
        .filter(|until| *until > Utc::now())
    {
        Some(until) => (
            format!("💎 <b>PREMIUM</b> ({} gacha)", until.format("%d.%m.%Y")),
            "♾ <b>CHEKSIZ</b>".to_string(),
        ),
        None => {
            let remaining = (limit - record.daily_used).max(0);
            ("🆓 FREE".to_string(), format!("📊 <b>{}/{}</b>", remaining, limit))
        }
    };

    bot.send_message(
        msg.chat.id,
        format!(
            "👤 <b>SIZNING PROFILINGIZ</b>\n\n\
             🆔 ID: <code>{}</code>\n\
             📌 Status: {}\n\
             📱 Kunlik limit: {}\n\
             🔗 Referallar: <b>{}</b>\n\n\
             ━━━━━━━━━━━━━━━━\n\
             💡 <b>PREMIUM OLISH:</b>\n\
             🔗 /referal — do'stlarni taklif qiling\n\
             💎 /premium — premium sotib oling",
            user.user_id, status_text, limit_text, record.referral_count
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;

    Ok(())
}

/// Handles /stats (admin only).
pub async fn handle_stats_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    if !config::admin::is_admin(user.user_id) {
        bot.send_message(msg.chat.id, "⛔ Bu buyruq faqat admin uchun.").await?;
        return Ok(());
    }

    let (total, premium, today_used) = {
        let conn = get_connection(&deps.db_pool)?;
        let now = entitlement::format_premium_until(Utc::now());
        (
            db::count_users(&conn)?,
            db::count_premium_users(&conn, &now)?,
            db::sum_daily_used(&conn, &entitlement::today_local())?,
        )
    };

    bot.send_message(
        msg.chat.id,
        format!(
            "📊 <b>BOT STATISTIKASI</b>\n\n\
             👥 Jami foydalanuvchilar: <b>{}</b>\n\
             💎 Faol premium: <b>{}</b>\n\
             📨 Bugungi so'rovlar: <b>{}</b>",
            total, premium, today_used
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;

    Ok(())
}

/// Handles /reset_limits (admin only): manual counter reset for everyone.
pub async fn handle_reset_limits_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    if !config::admin::is_admin(user.user_id) {
        bot.send_message(msg.chat.id, "⛔ Bu buyruq faqat admin uchun.").await?;
        return Ok(());
    }

    let count = {
        let conn = get_connection(&deps.db_pool)?;
        db::reset_all_daily_counters(&conn, &entitlement::today_local())?
    };

    log::info!("✅ Admin {} reset daily limits for {} users", user.user_id, count);
    bot.send_message(
        msg.chat.id,
        "✅ Barcha foydalanuvchilar uchun kunlik limitlar qayta tiklandi.",
    )
    .await?;

    Ok(())
}
