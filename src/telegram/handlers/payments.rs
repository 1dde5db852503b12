//! Premium purchase via Telegram Stars.
//!
//! One-time purchase, no auto-renewal: paying adds the configured number of
//! days on top of whatever premium the user already has, through the same
//! grant path the referral bonus uses.

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, LabeledPrice, ParseMode};
use url::Url;

use super::types::{HandlerDeps, HandlerError, UserInfo};
use crate::core::{config, entitlement};
use crate::storage::db;
use crate::storage::get_connection;
use crate::telegram::notifications::notify_admin_text;

/// Sends the premium invoice with a pay button.
pub async fn send_premium_invoice(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let user = UserInfo::from_message(msg);
    let price_stars = *config::premium::PRICE_STARS;
    let days = config::premium::PAID_DAYS;

    // Make sure the account exists before selling anything to it
    {
        let conn = get_connection(&deps.db_pool)?;
        entitlement::resolve_user(&conn, user.user_id, user.username.as_deref(), None)?;
    }

    let payload = format!("premium:{}:{}", days, user.user_id);
    log::info!(
        "📦 Creating premium invoice for user {}: {} Stars for {} days, payload={}",
        user.user_id,
        price_stars,
        days,
        payload
    );

    let title = format!("Premium — {} kun", days);
    let description = format!("{} kun davomida cheksiz so'rovlar", days);

    let invoice_link = bot
        .create_invoice_link(
            title,
            description,
            payload,
            "XTR".to_string(),
            vec![LabeledPrice::new("Premium", price_stars)],
        )
        .await?;

    log::info!("✅ Invoice link created for user {}", user.user_id);

    let invoice_url = Url::parse(&invoice_link).map_err(|e| format!("Invalid invoice URL: {}", e))?;
    let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
        format!("💳 To'lash ({} ⭐)", price_stars),
        invoice_url,
    )]]);

    bot.send_message(
        msg.chat.id,
        format!(
            "💎 <b>PREMIUM</b>\n\n\
             ♾ {} kun davomida cheksiz so'rovlar\n\
             ⭐ Narxi: <b>{} Stars</b>\n\n\
             ✨ To'lash uchun quyidagi tugmani bosing:",
            days, price_stars
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard)
    .await?;

    Ok(())
}

/// Approves or rejects a pre-checkout query.
pub async fn handle_pre_checkout(bot: &Bot, query: teloxide::types::PreCheckoutQuery) -> Result<(), HandlerError> {
    let query_id = query.id;
    let payload = query.invoice_payload;

    log::info!("Received pre_checkout_query: id={}, payload={}", query_id, payload);

    if payload.starts_with("premium:") {
        bot.answer_pre_checkout_query(query_id, true).await?;
        log::info!("✅ Pre-checkout approved for payload: {}", payload);
    } else {
        bot.answer_pre_checkout_query(query_id, false)
            .error_message("Noma'lum to'lov turi")
            .await?;
        log::warn!("Pre-checkout rejected for unknown payload: {}", payload);
    }

    Ok(())
}

/// Handles a successful Stars payment: record the charge and grant premium.
pub async fn handle_successful_payment(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let Some(payment) = msg.successful_payment() else {
        return Ok(());
    };

    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("💳 SUCCESSFUL PAYMENT EVENT");
    log::info!("  • Currency: {}", payment.currency);
    log::info!("  • Total amount: {}", payment.total_amount);
    log::info!("  • Invoice payload: {}", payment.invoice_payload);
    log::info!("  • Charge ID: {}", payment.telegram_payment_charge_id.0);
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let Some((days, user_id)) = parse_premium_payload(&payment.invoice_payload) else {
        log::error!("Unknown payment payload, ignoring: {}", payment.invoice_payload);
        return Ok(());
    };

    let charge_id = payment.telegram_payment_charge_id.0.clone();

    let grant = {
        let conn = get_connection(&deps.db_pool)?;

        // Keep the charge for accounting; a duplicate delivery is a no-op
        if let Err(e) = db::record_star_payment(
            &conn,
            &charge_id,
            user_id,
            payment.total_amount as i64,
            &payment.invoice_payload,
        ) {
            log::error!("❌ Failed to record star payment {}: {}", charge_id, e);
            // Non-critical, the grant still goes through
        }

        entitlement::resolve_user(&conn, user_id, None, None)?;
        entitlement::grant_or_extend_premium(&conn, user_id, days)
    };

    match grant {
        Ok(until) => {
            log::info!(
                "✅ Premium activated for user {} until {}",
                user_id,
                entitlement::format_premium_until(until)
            );
            bot.send_message(
                msg.chat.id,
                format!(
                    "✅ <b>To'lov qabul qilindi!</b>\n\n\
                     💎 Premium faollashtirildi\n\
                     📅 Amal qilish muddati: <b>{}</b> gacha\n\n\
                     ♾ Endi so'rovlaringiz cheksiz!",
                    until.format("%d.%m.%Y")
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        Err(e) => {
            log::error!("❌ Failed to activate premium for user {}: {}", user_id, e);
            notify_admin_text(
                bot,
                &format!(
                    "PAYMENT FAILURE (premium grant)\nuser_id: {}\ncharge_id: {}\nerror: {}",
                    user_id, charge_id, e
                ),
            )
            .await;
            bot.send_message(
                msg.chat.id,
                "❌ To'lovni qayta ishlashda xatolik yuz berdi. Administratorga murojaat qiling.",
            )
            .await?;
        }
    }

    Ok(())
}

/// Parses "premium:<days>:<user_id>" payloads.
fn parse_premium_payload(payload: &str) -> Option<(i64, i64)> {
    let parts: Vec<&str> = payload.split(':').collect();
    if parts.len() != 3 || parts[0] != "premium" {
        return None;
    }

    let days = parts[1].parse::<i64>().ok()?;
    let user_id = parts[2].parse::<i64>().ok()?;
    if days <= 0 || user_id == 0 {
        return None;
    }

    Some((days, user_id))
}
