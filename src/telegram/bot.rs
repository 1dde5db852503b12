//! Bot construction and the command menu.

use anyhow::Context;
use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Every slash command the bot understands. Descriptions are what the
/// Telegram client shows in the command menu.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case", description = "Men quyidagilarni qila olaman:")]
pub enum Command {
    #[command(description = "botni ishga tushirish")]
    Start(String),
    #[command(description = "yordam")]
    Help,
    #[command(description = "referal havolangiz")]
    Referal,
    #[command(description = "profil va kunlik limit")]
    Profil,
    #[command(description = "premium sotib olish")]
    Premium,
    #[command(description = "bot statistikasi (faqat admin)")]
    Stats,
    #[command(description = "kunlik limitlarni qayta tiklash (faqat admin)")]
    ResetLimits,
}

/// Builds the Bot with an explicit request timeout. When BOT_API_URL points
/// at a self-hosted Bot API server, all calls go there instead of
/// api.telegram.org.
pub fn create_bot() -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::from_env_with_client(client);

    match std::env::var("BOT_API_URL") {
        Ok(raw) => {
            let url = url::Url::parse(&raw).context("BOT_API_URL is not a valid URL")?;
            log::info!("Using custom Bot API URL: {}", url);
            Ok(bot.set_api_url(url))
        }
        Err(_) => Ok(bot),
    }
}

/// Registers the visible command menu. /stats and /reset_limits are left
/// out on purpose: they answer only to admins.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![
        BotCommand::new("start", "botni ishga tushirish"),
        BotCommand::new("help", "yordam"),
        BotCommand::new("referal", "referal havolangiz"),
        BotCommand::new("profil", "profil va kunlik limit"),
        BotCommand::new("premium", "premium sotib olish"),
    ])
    .await?;

    Ok(())
}
