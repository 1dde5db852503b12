//! Out-of-band notifications: referral bonuses, premium expiry, admin pings.
//!
//! All senders here swallow delivery errors after logging them. A user who
//! blocked the bot must never break the flow that triggered the message.

use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;

use crate::core::config;

/// Tells the referrer their link brought a new user and premium was added.
pub async fn notify_referrer_credited(
    bot: &Bot,
    referrer_id: i64,
    new_user_name: &str,
    referral_count: i64,
    premium_until: DateTime<Utc>,
) {
    let message = format!(
        "🎉 <b>Yangi referal!</b>\n\n\
         👤 {} sizning havolangiz orqali qo'shildi!\n\
         📊 Jami referallar: <b>{}</b>\n\
         🎁 +{} kun PREMIUM qo'shildi!\n\n\
         📅 Premium muddat: <b>{}</b> gacha",
        html::escape(new_user_name),
        referral_count,
        *config::referral::BONUS_DAYS,
        premium_until.format("%d.%m.%Y")
    );

    match bot
        .send_message(ChatId(referrer_id), message)
        .parse_mode(ParseMode::Html)
        .await
    {
        Ok(_) => log::info!("✅ Referral bonus notification sent to user {}", referrer_id),
        Err(e) => log::warn!("Failed to notify referrer {}: {}", referrer_id, e),
    }
}

/// Tells a user their premium ran out and how to get it back.
pub async fn notify_premium_expired(bot: &Bot, user_id: i64) {
    let message = format!(
        "⌛ <b>Premium muddati tugadi</b>\n\n\
         Kunlik limit yana <b>{}</b> ta so'rov bo'ldi.\n\n\
         🎁 Yana premium olish uchun:\n\
         🔗 /referal — do'stlarni taklif qiling\n\
         💎 /premium — premium sotib oling",
        *config::quota::FREE_DAILY_LIMIT
    );

    match bot
        .send_message(ChatId(user_id), message)
        .parse_mode(ParseMode::Html)
        .await
    {
        Ok(_) => log::info!("✅ Premium expiry notification sent to user {}", user_id),
        Err(e) => log::warn!("Failed to notify user {} about premium expiry: {}", user_id, e),
    }
}

/// Pings the administrator about a new user.
pub async fn notify_admin_new_user(bot: &Bot, user_id: i64, username: Option<&str>, first_name: Option<&str>) {
    let admin_id = *config::admin::ADMIN_USER_ID;
    if admin_id == 0 {
        return;
    }

    let message = format!(
        "👤 New user: {} (@{}) {}",
        user_id,
        username.unwrap_or("-"),
        first_name.unwrap_or("")
    );

    if let Err(e) = bot.send_message(ChatId(admin_id), message).await {
        log::warn!("Failed to notify admin about new user {}: {}", user_id, e);
    }
}

/// Sends a plain-text message to the administrator.
pub async fn notify_admin_text(bot: &Bot, text: &str) {
    let admin_id = *config::admin::ADMIN_USER_ID;
    if admin_id == 0 {
        log::warn!("No admin configured, dropping admin notification: {}", text);
        return;
    }

    if let Err(e) = bot.send_message(ChatId(admin_id), text.to_string()).await {
        log::error!("Failed to send admin notification: {}", e);
    }
}
