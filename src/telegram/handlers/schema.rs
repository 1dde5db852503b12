//! The dptree handler tree wiring updates to their handlers.

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use super::chat::handle_text_message;
use super::commands::{
    handle_help_command, handle_profil_command, handle_referal_command, handle_reset_limits_command,
    handle_start_command, handle_stats_command,
};
use super::media::{handle_photo_message, handle_voice_message};
use super::payments::{handle_pre_checkout, handle_successful_payment, send_premium_invoice};
use super::types::{HandlerDeps, HandlerError};
use crate::telegram::bot::Command;
use crate::telegram::gate::{handle_subscription_callback, CHECK_SUBSCRIPTION_CALLBACK};
use crate::telegram::notifications::notify_admin_text;
use crate::telegram::Bot;

/// Builds the dispatcher's handler tree. Production and integration tests
/// run the same tree.
///
/// Branch order matters: a successful-payment message also has no text, so
/// it must be claimed before the plain-message branches get a look at it.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let for_payments = deps.clone();
    let for_commands = deps.clone();
    let for_photos = deps.clone();
    let for_voice = deps.clone();
    let for_text = deps.clone();

    dptree::entry()
        .branch(successful_payment_handler(for_payments))
        .branch(command_handler(for_commands))
        .branch(photo_handler(for_photos))
        .branch(voice_handler(for_voice))
        .branch(text_handler(for_text))
        .branch(pre_checkout_handler())
        .branch(callback_handler())
}

/// Confirmed Stars payments. A failure here means the user paid and got
/// nothing, so the admin is pinged immediately.
fn successful_payment_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.successful_payment().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                log::info!("Successful payment update in chat {}", msg.chat.id);

                if let Err(e) = handle_successful_payment(&bot, &msg, &deps).await {
                    log::error!("Successful-payment handling failed: {:?}", e);
                    notify_admin_text(
                        &bot,
                        &format!("PAYMENT HANDLER ERROR\nchat: {}\nerror: {:?}", msg.chat.id.0, e),
                    )
                    .await;
                }
                Ok(())
            }
        })
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Command {:?} in chat {}", cmd, msg.chat.id);

                match cmd {
                    Command::Start(payload) => handle_start_command(&bot, &msg, &deps, &payload).await,
                    Command::Help => handle_help_command(&bot, &msg).await,
                    Command::Referal => handle_referal_command(&bot, &msg, &deps).await,
                    Command::Profil => handle_profil_command(&bot, &msg, &deps).await,
                    Command::Premium => send_premium_invoice(&bot, &msg, &deps).await,
                    Command::Stats => handle_stats_command(&bot, &msg, &deps).await,
                    Command::ResetLimits => handle_reset_limits_command(&bot, &msg, &deps).await,
                }
            }
        },
    ))
}

fn photo_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.photo().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                if let Err(e) = handle_photo_message(&bot, &msg, &deps).await {
                    log::error!("❌ Photo handler failed for chat {}: {}", msg.chat.id, e);
                }
                Ok(())
            }
        })
}

fn voice_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.voice().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                if let Err(e) = handle_voice_message(&bot, &msg, &deps).await {
                    log::error!("❌ Voice handler failed for chat {}: {}", msg.chat.id, e);
                }
                Ok(())
            }
        })
}

/// Keyboard buttons and free-form tutoring text.
fn text_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                if let Err(e) = handle_text_message(&bot, &msg, &deps).await {
                    log::error!("❌ Message handler failed for chat {}: {}", msg.chat.id, e);
                }
                Ok(())
            }
        })
}

fn pre_checkout_handler() -> UpdateHandler<HandlerError> {
    Update::filter_pre_checkout_query().endpoint(|bot: Bot, query: teloxide::types::PreCheckoutQuery| async move {
        if let Err(e) = handle_pre_checkout(&bot, query).await {
            log::error!("Failed to answer pre_checkout_query: {:?}", e);
        }
        Ok(())
    })
}

/// Inline-button presses; today that is only the channel gate's re-check.
fn callback_handler() -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(|bot: Bot, q: CallbackQuery| async move {
        if q.data.as_deref() == Some(CHECK_SUBSCRIPTION_CALLBACK) {
            if let Err(e) = handle_subscription_callback(&bot, q).await {
                log::error!("Failed to handle subscription callback: {:?}", e);
            }
        }
        Ok(())
    })
}
