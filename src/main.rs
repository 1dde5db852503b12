use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::Me;
use tokio::time::sleep;

use ustozbot::ai::OpenAIClient;
use ustozbot::cli::{Cli, Commands};
use ustozbot::core::session::SessionStore;
use ustozbot::core::{config, entitlement, init_logger, log_startup_configuration, sweep};
use ustozbot::storage::db;
use ustozbot::storage::{create_pool, get_connection, DbPool};
use ustozbot::telegram::notifications::notify_premium_expired;
use ustozbot::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    install_panic_hook();
    init_logger(&config::LOG_FILE_PATH)?;
    let _ = dotenv();

    match cli.command {
        Some(Commands::Sweep { dry_run }) => {
            log::info!("Running premium expiry sweep (dry_run: {})", dry_run);
            run_sweep_once(dry_run).await
        }
        Some(Commands::ResetLimits) => {
            log::info!("Resetting daily counters");
            run_reset_limits().await
        }
        Some(Commands::Stats) => run_stats().await,
        Some(Commands::Run) | None => run_bot().await,
    }
}

/// Dispatcher tasks can panic (teloxide's internal channels in particular);
/// the hook turns those into log lines so the restart loop gets its chance.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        log::error!("Panic at {}: {}", location, panic_info);
    }));
}

fn open_pool() -> Result<DbPool> {
    create_pool(&config::DATABASE_PATH).context("opening the database pool")
}

/// Run a single premium expiry sweep from the command line and exit
async fn run_sweep_once(dry_run: bool) -> Result<()> {
    let db_pool = open_pool()?;
    let conn = get_connection(&db_pool).context("checking out a connection")?;

    let now = chrono::Utc::now();

    if dry_run {
        let now_str = now.format(entitlement::DATETIME_FMT).to_string();
        let candidates = db::list_expired_premium(&conn, &now_str)?;
        if candidates.is_empty() {
            log::info!("No expired premiums found");
        } else {
            log::info!("Would expire {} premium(s):", candidates.len());
            for user_id in candidates {
                log::info!("  • user {}", user_id);
            }
        }
        return Ok(());
    }

    let report = sweep::run_sweep(&conn, now)?;
    log::info!(
        "Sweep finished: {} candidate(s), {} expired, {} failed",
        report.scanned,
        report.expired.len(),
        report.failures
    );
    Ok(())
}

/// Zero every user's daily counter from the command line and exit
async fn run_reset_limits() -> Result<()> {
    let db_pool = open_pool()?;
    let conn = get_connection(&db_pool).context("checking out a connection")?;

    let today = entitlement::today_local();
    let count = db::reset_all_daily_counters(&conn, &today)?;
    log::info!("Daily counters reset for {} user(s)", count);
    Ok(())
}

/// Print user and usage totals from the command line and exit
async fn run_stats() -> Result<()> {
    let db_pool = open_pool()?;
    let conn = get_connection(&db_pool).context("checking out a connection")?;

    let now_str = chrono::Utc::now().format(entitlement::DATETIME_FMT).to_string();
    let today = entitlement::today_local();

    let total = db::count_users(&conn)?;
    let premium = db::count_premium_users(&conn, &now_str)?;
    let used_today = db::sum_daily_used(&conn, &today)?;

    log::info!("Users: {} total, {} with active premium", total, premium);
    log::info!("Actions consumed today: {}", used_today);
    Ok(())
}

/// Waits for the Bot API to answer getMe. A local Bot API server (BOT_API_URL)
/// needs time to boot, so transient failures are retried for a few minutes.
async fn wait_for_bot_api(bot: &Bot) -> Result<Me> {
    const MAX_ATTEMPTS: u32 = 60;
    const RETRY_DELAY: Duration = Duration::from_secs(5);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match bot.get_me().await {
            Ok(me) => return Ok(me),
            Err(e) => e,
        };

        let text = err.to_string();
        let transient = ["restart", "network", "connection", "timed out", "Connection refused"]
            .iter()
            .any(|needle| text.contains(needle));

        if !transient || attempt >= MAX_ATTEMPTS {
            return Err(err).with_context(|| format!("Bot API unreachable after {} attempt(s)", attempt));
        }

        log::warn!(
            "Bot API not ready ({}/{}): {}. Retrying in {:?}...",
            attempt,
            MAX_ATTEMPTS,
            text,
            RETRY_DELAY
        );
        sleep(RETRY_DELAY).await;
    }
}

/// The long-running mode: polling dispatcher plus background loops.
async fn run_bot() -> Result<()> {
    let bot_init_start = std::time::Instant::now();
    log::info!("Starting bot...");

    // Log the effective configuration so misconfiguration shows up immediately
    log_startup_configuration();

    let bot = create_bot()?;

    // Referral deep links need the bot's username
    let bot_info = wait_for_bot_api(&bot).await?;
    let bot_username = bot_info.username.as_deref();
    log::info!("Bot username: {:?}, Bot ID: {}", bot_username, bot_info.id);

    setup_bot_commands(&bot).await?;

    // Schema migration runs on the pool's first connection
    let db_pool = Arc::new(open_pool()?);

    // Per-user tutoring mode and short conversation history
    let sessions = Arc::new(SessionStore::new());

    // OpenAI client shared by all handlers
    let ai = Arc::new(OpenAIClient::from_env()?);

    // Start the hourly premium expiry sweeper and deliver a notice to each
    // user whose premium lapsed
    let mut expiry_rx = sweep::start_sweeper(Arc::clone(&db_pool));
    let bot_expiry = bot.clone();
    tokio::spawn(async move {
        while let Some(notice) = expiry_rx.recv().await {
            notify_premium_expired(&bot_expiry, notice.user_id).await;
        }
        log::warn!("Expiry notice channel closed");
    });

    // Reset every user's daily counter at local midnight. The per-request
    // rollover already keeps individual users correct; this bulk pass keeps
    // admin stats fresh for users who never came back that day.
    let db_pool_midnight = Arc::clone(&db_pool);
    tokio::spawn(async move {
        loop {
            let now = chrono::Local::now();
            let next_midnight = match now.date_naive().succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)) {
                Some(dt) => dt,
                None => {
                    log::error!("Failed to compute next midnight, daily reset task stopped");
                    return;
                }
            };
            let secs = (next_midnight - now.naive_local()).num_seconds().max(1) as u64;
            sleep(Duration::from_secs(secs)).await;

            let today = entitlement::today_local();
            match get_connection(&db_pool_midnight) {
                Ok(conn) => match db::reset_all_daily_counters(&conn, &today) {
                    Ok(count) => log::info!("🔄 Daily counters reset for {} user(s)", count),
                    Err(e) => log::error!("Failed to reset daily counters: {}", e),
                },
                Err(e) => log::error!("Failed to get DB connection for daily reset: {}", e),
            }
        }
    });

    let handler_deps = HandlerDeps::new(
        Arc::clone(&db_pool),
        Arc::clone(&sessions),
        Arc::clone(&ai),
        bot_username.map(|s| s.to_string()),
    );
    let handler = schema(handler_deps);

    log::info!("================================================");
    log::info!(
        "🎉 Initialization done in {:.2}s, polling for updates",
        bot_init_start.elapsed().as_secs_f64()
    );
    log::info!("================================================");

    // Each dispatcher run lives in its own task: a panic inside teloxide
    // ("TX is dead" when the API connection drops) surfaces as a JoinError
    // here instead of taking the process down, and we reconnect.
    let mut retry_count = 0;
    loop {
        let bot_run = bot.clone();
        let handler_run = handler.clone();

        let outcome = tokio::spawn(async move {
            use teloxide::update_listeners::Polling;

            let listener = Polling::builder(bot_run.clone()).drop_pending_updates().build();

            Dispatcher::builder(bot_run, handler_run)
                .dependencies(DependencyMap::new())
                .enable_ctrlc_handler()
                .build()
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        })
        .await;

        match outcome {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Err(join_err) if join_err.is_panic() => {
                log::error!("Dispatcher panicked: {}", join_err);

                retry_count += 1;
                if retry_count > config::retry::MAX_DISPATCHER_RETRIES {
                    log::error!("Giving up after {} dispatcher restarts", retry_count - 1);
                    break;
                }
                log::info!(
                    "Restarting dispatcher ({}/{})...",
                    retry_count,
                    config::retry::MAX_DISPATCHER_RETRIES
                );
                exponential_backoff(retry_count).await;
                sleep(config::retry::dispatcher_delay()).await;
            }
            Err(join_err) => {
                log::warn!("Dispatcher task was cancelled: {}", join_err);
                break;
            }
        }
    }

    Ok(())
}

async fn exponential_backoff(retry_count: u32) {
    let delay = Duration::from_secs(config::retry::EXPONENTIAL_BACKOFF_BASE.pow(retry_count));
    sleep(delay).await;
}
