//! Logger setup and the startup configuration banner.

use anyhow::{Context, Result};
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Sets up the global logger: colored terminal output plus a plain-text
/// file sink at `log_file_path`. Call once, before anything logs.
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file =
        File::create(log_file_path).with_context(|| format!("failed to create log file {}", log_file_path))?;

    let sinks: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ];

    CombinedLogger::init(sinks).context("logger already initialized")?;
    Ok(())
}

/// Prints the effective configuration right after startup: token presence,
/// quota and pricing knobs, channel gate and admin wiring. A misconfigured
/// deployment should be obvious from the first screen of the log.
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("⚙️  Startup Configuration Check");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if config::BOT_TOKEN.is_empty() {
        log::error!("❌ BOT_TOKEN: not set - the bot cannot start without it");
    } else {
        log::info!("✅ BOT_TOKEN: set");
    }

    if config::ai::OPENAI_API_KEY.is_empty() {
        log::error!("❌ OPENAI_API_KEY: not set - AI replies will FAIL!");
        log::error!("   Get a key at https://platform.openai.com and export OPENAI_API_KEY");
    } else {
        log::info!("✅ OPENAI_API_KEY: set (model: {})", config::ai::CHAT_MODEL.as_str());
    }

    log::info!(
        "📊 Daily quota: {} free messages, {}d premium per referral, {} Stars for {}d premium",
        *config::quota::FREE_DAILY_LIMIT,
        *config::referral::BONUS_DAYS,
        *config::premium::PRICE_STARS,
        config::premium::PAID_DAYS
    );

    let channel_id = *config::channel::REQUIRED_CHANNEL_ID;
    if channel_id == 0 {
        log::info!("ℹ️  Channel gate disabled (REQUIRED_CHANNEL_ID unset)");
    } else if config::channel::INVITE_LINK.is_some() {
        log::info!("✅ Channel gate enabled for {}", channel_id);
    } else {
        log::warn!(
            "⚠️  Channel gate enabled for {} but CHANNEL_INVITE_LINK is unset - users cannot be pointed at the channel",
            channel_id
        );
    }

    if *config::admin::ADMIN_USER_ID == 0 {
        log::warn!("⚠️  ADMIN_USER_ID not set - admin commands and notices disabled");
    } else {
        log::info!(
            "✅ Admins configured: {} (primary: {})",
            config::admin::ADMIN_IDS.len().max(1),
            *config::admin::ADMIN_USER_ID
        );
    }

    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
