//! Premium expiry sweeper
//!
//! Walks the ledger for premiums that have run out, clears them and reports
//! the affected users so the bot can tell them. The clear itself re-checks
//! the expiry inside a conditional UPDATE, so a user who buys an extension
//! between the scan and the write keeps their premium, and no user is ever
//! reported expired twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::core::config;
use crate::core::entitlement::format_premium_until;
use crate::core::error::AppResult;
use crate::storage::db;
use crate::storage::{get_connection, DbPool};

/// Outcome of one sweep pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Candidates found by the scan
    pub scanned: usize,
    /// Users whose premium this pass actually cleared
    pub expired: Vec<i64>,
    /// Records that failed to update and will be retried next pass
    pub failures: usize,
}

/// Notification that a user's premium was cleared by the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotice {
    pub user_id: i64,
}

/// Runs one sweep pass at the given instant.
///
/// One bad record does not abort the pass: update failures are logged,
/// counted and left in place for the next run.
pub fn run_sweep(conn: &Connection, now: DateTime<Utc>) -> AppResult<SweepReport> {
    let now_s = format_premium_until(now);
    let candidates = db::list_expired_premium(conn, &now_s)?;

    let mut report = SweepReport {
        scanned: candidates.len(),
        ..Default::default()
    };

    for user_id in candidates {
        match db::clear_premium_if_expired(conn, user_id, &now_s) {
            Ok(true) => report.expired.push(user_id),
            // Extended or already cleared between the scan and this write
            Ok(false) => {}
            Err(e) => {
                log::error!("❌ Failed to clear expired premium for user {}: {}", user_id, e);
                report.failures += 1;
            }
        }
    }

    Ok(report)
}

/// Starts the hourly sweeper and returns the channel of expiry notices.
///
/// The first pass runs immediately, which also catches premiums that ran
/// out while the bot was down.
pub fn start_sweeper(db_pool: Arc<DbPool>) -> mpsc::UnboundedReceiver<ExpiryNotice> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut ticker = interval(config::scheduler::sweep_interval());
        log::info!(
            "🔄 Premium expiry sweeper started (interval: {:?})",
            config::scheduler::sweep_interval()
        );

        loop {
            ticker.tick().await;

            let conn = match get_connection(&db_pool) {
                Ok(conn) => conn,
                Err(e) => {
                    log::error!("❌ Sweeper could not get a DB connection: {}", e);
                    continue;
                }
            };

            match run_sweep(&conn, Utc::now()) {
                Ok(report) => {
                    if !report.expired.is_empty() || report.failures > 0 {
                        log::info!(
                            "📊 Premium sweep: {} candidates, {} expired, {} failures",
                            report.scanned,
                            report.expired.len(),
                            report.failures
                        );
                    }
                    for user_id in report.expired {
                        if tx.send(ExpiryNotice { user_id }).is_err() {
                            log::warn!("Expiry notice channel closed, stopping sweeper");
                            return;
                        }
                    }
                }
                Err(e) => log::error!("❌ Premium sweep failed: {}", e),
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entitlement::today_local;
    use pretty_assertions::assert_eq;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::migrate_schema(&conn).unwrap();
        conn
    }

    fn seed_user(conn: &Connection, user_id: i64, premium_until: Option<&str>) {
        db::create_user_if_absent(conn, user_id, None, None, &today_local()).unwrap();
        if let Some(until) = premium_until {
            db::set_premium_until(conn, user_id, until).unwrap();
        }
    }

    #[test]
    fn test_sweep_clears_only_expired_premiums() {
        let conn = test_conn();
        seed_user(&conn, 1, Some("2020-01-01 00:00:00"));
        seed_user(&conn, 2, Some("2041-01-01 00:00:00"));
        seed_user(&conn, 3, None);

        let report = run_sweep(&conn, Utc::now()).unwrap();
        assert_eq!(report.expired, vec![1]);
        assert_eq!(report.failures, 0);

        assert_eq!(db::get_user(&conn, 1).unwrap().unwrap().premium_until, None);
        assert_eq!(
            db::get_user(&conn, 2).unwrap().unwrap().premium_until.as_deref(),
            Some("2041-01-01 00:00:00")
        );
    }

    #[test]
    fn test_sweep_reports_each_expiry_once() {
        let conn = test_conn();
        seed_user(&conn, 1, Some("2020-01-01 00:00:00"));

        let first = run_sweep(&conn, Utc::now()).unwrap();
        assert_eq!(first.expired, vec![1]);

        let second = run_sweep(&conn, Utc::now()).unwrap();
        assert_eq!(second.scanned, 0);
        assert!(second.expired.is_empty());
    }

    #[test]
    fn test_sweep_ignores_boundary_instant() {
        let conn = test_conn();
        seed_user(&conn, 1, Some("2030-06-15 12:00:00"));

        // Only premium_until strictly before now counts as expired; the
        // exact boundary instant is left for the next pass
        let at_expiry = crate::core::entitlement::parse_premium_until("2030-06-15 12:00:00").unwrap();
        let report = run_sweep(&conn, at_expiry).unwrap();
        assert!(report.expired.is_empty());

        let just_after = crate::core::entitlement::parse_premium_until("2030-06-15 12:00:01").unwrap();
        let report = run_sweep(&conn, just_after).unwrap();
        assert_eq!(report.expired, vec![1]);
    }
}
