//! Environment-driven configuration.
//!
//! Single values are `Lazy` statics read once on first use; related knobs
//! live in nested modules so call sites read as `config::quota::...`.

use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Telegram bot token, from BOT_TOKEN with TELOXIDE_TOKEN as the fallback
/// name teloxide users tend to have exported already.
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_default()
});

/// SQLite file location (DATABASE_PATH), created on first start.
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "ustozbot.sqlite".to_string()));

/// Log file location (LOG_FILE_PATH).
pub static LOG_FILE_PATH: Lazy<String> = Lazy::new(|| match env::var("LOG_FILE_PATH") {
    Ok(path) => path,
    Err(_) => "app.log".to_string(),
});

/// Daily quota configuration
pub mod quota {
    use once_cell::sync::Lazy;
    use std::env;

    /// Daily message limit for users without an active premium
    /// Read from FREE_DAILY_LIMIT environment variable
    /// Default: 10 messages per day
    pub static FREE_DAILY_LIMIT: Lazy<i64> = Lazy::new(|| {
        env::var("FREE_DAILY_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    });
}

/// Referral program configuration
pub mod referral {
    use once_cell::sync::Lazy;
    use std::env;

    /// Premium days awarded to the referrer for each new user who joins
    /// through their link. With the default of 6 days, five referrals add
    /// up to a full 30-day premium.
    /// Read from REFERRAL_BONUS_DAYS environment variable
    pub static BONUS_DAYS: Lazy<i64> = Lazy::new(|| {
        env::var("REFERRAL_BONUS_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(6)
    });
}

/// Premium subscription pricing configuration
pub mod premium {
    use once_cell::sync::Lazy;
    use std::env;

    /// Price of 30 premium days in Telegram Stars (PREMIUM_PRICE_STARS),
    /// 100 by default.
    pub static PRICE_STARS: Lazy<u32> = Lazy::new(|| {
        env::var("PREMIUM_PRICE_STARS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100)
    });

    /// Premium days granted per paid purchase
    pub const PAID_DAYS: i64 = 30;
}

/// Required channel gate configuration
pub mod channel {
    use once_cell::sync::Lazy;
    use std::env;

    /// Telegram channel the user must join before the bot answers.
    /// Read from REQUIRED_CHANNEL_ID environment variable (e.g. -1002301829498).
    /// Set to 0 (or leave unset) to disable the gate.
    pub static REQUIRED_CHANNEL_ID: Lazy<i64> = Lazy::new(|| {
        env::var("REQUIRED_CHANNEL_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    });

    /// Invite link shown under the "join the channel" prompt
    /// Read from CHANNEL_INVITE_LINK environment variable
    pub static INVITE_LINK: Lazy<Option<String>> = Lazy::new(|| {
        env::var("CHANNEL_INVITE_LINK")
            .ok()
            .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
    });
}

/// Who may run /stats and /reset_limits, and who receives service notices.
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    fn split_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|piece| piece.trim().parse::<i64>().ok())
            .collect()
    }

    /// Every admin account, from ADMIN_IDS (comma or whitespace separated).
    pub static ADMIN_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ADMIN_IDS")
            .ok()
            .map(|raw| split_ids(&raw))
            .unwrap_or_default()
    });

    /// The account that receives new-user notices and payment failure
    /// alerts: ADMIN_USER_ID, or the first ADMIN_IDS entry, or 0 meaning
    /// nobody gets notified.
    pub static ADMIN_USER_ID: Lazy<i64> = Lazy::new(|| {
        env::var("ADMIN_USER_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| ADMIN_IDS.first().copied())
            .unwrap_or(0)
    });

    /// Returns true if the given Telegram ID belongs to an admin.
    pub fn is_admin(user_id: i64) -> bool {
        user_id != 0 && (ADMIN_IDS.contains(&user_id) || *ADMIN_USER_ID == user_id)
    }
}

/// OpenAI models and limits.
pub mod ai {
    use once_cell::sync::Lazy;
    use std::env;

    /// OpenAI API key (OPENAI_API_KEY). Left empty, the client refuses to
    /// construct.
    pub static OPENAI_API_KEY: Lazy<String> =
        Lazy::new(|| env::var("OPENAI_API_KEY").unwrap_or_default());

    /// Chat model for all tutoring modes (OPENAI_CHAT_MODEL),
    /// gpt-4o-mini by default.
    pub static CHAT_MODEL: Lazy<String> =
        Lazy::new(|| env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()));

    /// Token cap for regular chat replies. Kept small so answers stay short
    /// and cheap for a high-volume free tier.
    pub const CHAT_MAX_TOKENS: u32 = 180;

    /// Token cap for photo (vision) replies
    pub const VISION_MAX_TOKENS: u32 = 300;

    /// Token cap for the speaking-practice examiner reply
    pub const REVIEW_MAX_TOKENS: u32 = 220;

    /// Sampling temperature for all completions
    pub const CHAT_TEMPERATURE: f32 = 0.6;

    /// How many user/assistant exchanges to keep per conversation
    pub const HISTORY_MAX_TURNS: usize = 4;

    /// Voice used for speech synthesis (OPENAI_TTS_VOICE), alloy by default.
    pub static TTS_VOICE: Lazy<String> =
        Lazy::new(|| env::var("OPENAI_TTS_VOICE").unwrap_or_else(|_| "alloy".to_string()));

    /// Language hint passed to Whisper for speaking practice
    pub const SPEECH_LANGUAGE: &str = "en";
}

/// Background loop cadence.
pub mod scheduler {
    use super::Duration;

    /// Seconds between premium expiry sweeps.
    pub const SWEEP_INTERVAL_SECS: u64 = 60 * 60; // 1 hour

    pub fn sweep_interval() -> Duration {
        Duration::from_secs(SWEEP_INTERVAL_SECS)
    }
}

/// Outgoing HTTP behavior.
pub mod network {
    use super::Duration;

    /// One timeout for all outgoing HTTP: Bot API calls and OpenAI calls,
    /// sized for voice uploads on a slow uplink.
    pub const REQUEST_TIMEOUT_SECS: u64 = 90;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Dispatcher restart policy.
pub mod retry {
    use super::Duration;

    /// How often the polling dispatcher may be restarted after a panic
    pub const MAX_DISPATCHER_RETRIES: u32 = 5;

    /// Base of the exponential backoff between restarts
    pub const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

    /// Flat delay added on top of the backoff (in seconds)
    pub const DISPATCHER_RETRY_DELAY_SECS: u64 = 5;

    pub fn dispatcher_delay() -> Duration {
        Duration::from_secs(DISPATCHER_RETRY_DELAY_SECS)
    }
}
