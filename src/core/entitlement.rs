//! Quota and entitlement ledger
//!
//! Policy layer over the `users` table: lazy account creation with one-shot
//! referral crediting, the lazy daily rollover, quota consumption and premium
//! grants. All read-modify-write races are settled by the conditional UPDATEs
//! in `storage::db`, so these functions stay correct with concurrent handlers
//! on separate pool connections.

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};
use rusqlite::Connection;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::storage::db::{self, User};

/// Format of `usage_date` (bot-local calendar day)
pub const DATE_FMT: &str = "%Y-%m-%d";

/// Format of `premium_until` (UTC, lexicographically comparable)
pub const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Current calendar day in the bot's local timezone, as stored in `usage_date`.
pub fn today_local() -> String {
    Local::now().format(DATE_FMT).to_string()
}

/// Parses a stored `premium_until` timestamp. Malformed values yield `None`
/// and are treated as "no premium" everywhere.
pub fn parse_premium_until(ts: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(ts, DATETIME_FMT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Formats a premium expiry instant for storage.
pub fn format_premium_until(ts: DateTime<Utc>) -> String {
    ts.format(DATETIME_FMT).to_string()
}

/// Returns true if the stored premium expiry lies strictly in the future.
///
/// An expiry exactly equal to `now` is already over, and a timestamp that
/// fails to parse never grants access.
pub fn is_entitled(premium_until: Option<&str>, now: DateTime<Utc>) -> bool {
    premium_until
        .and_then(parse_premium_until)
        .map(|until| until > now)
        .unwrap_or(false)
}

/// Result of [`resolve_user`].
#[derive(Debug)]
pub struct ResolvedUser {
    pub user: User,
    /// True when this call created the account
    pub created: bool,
    /// Referrer credited by this call, set only on genuine first creation
    pub credited_referrer: Option<i64>,
}

/// Looks up a user, creating the account on first contact.
///
/// A referral is credited only when all of these hold: the account did not
/// exist before this call, the referrer is not the user themselves, and the
/// referrer already has an account. The `INSERT OR IGNORE` row count decides
/// "did not exist", so two racing first messages credit the referrer once.
pub fn resolve_user(
    conn: &Connection,
    user_id: i64,
    username: Option<&str>,
    referrer: Option<i64>,
) -> AppResult<ResolvedUser> {
    let today = today_local();

    // A referrer only counts if it is another, already known user
    let valid_referrer = match referrer {
        Some(rid) if rid != user_id => db::get_user(conn, rid)?.map(|r| r.user_id),
        _ => None,
    };

    let created = db::create_user_if_absent(conn, user_id, username, valid_referrer, &today)?;

    let mut credited_referrer = None;
    if created {
        if let Some(rid) = valid_referrer {
            db::increment_referral_count(conn, rid)?;
            grant_or_extend_premium(conn, rid, *config::referral::BONUS_DAYS)?;
            credited_referrer = Some(rid);
            log::info!("User {} joined via referral from {}", user_id, rid);
        }
    }

    let user = db::get_user(conn, user_id)?
        .ok_or_else(|| AppError::Validation(format!("user {} missing right after insert", user_id)))?;

    Ok(ResolvedUser {
        user,
        created,
        credited_referrer,
    })
}

/// Resets the daily counter if the stored date is not today.
///
/// Idempotent; safe to call before every quota decision. Returns true when
/// this call performed the reset.
pub fn check_and_reset(conn: &Connection, user_id: i64) -> AppResult<bool> {
    let today = today_local();
    Ok(db::rollover_daily(conn, user_id, &today)?)
}

/// Outcome of a quota consumption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Active premium, nothing counted
    Entitled,
    /// Free user within the limit, one message counted
    Counted { used: i64, limit: i64 },
    /// Free user over the limit, nothing counted
    LimitReached { limit: i64 },
}

impl ConsumeOutcome {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, ConsumeOutcome::LimitReached { .. })
    }
}

/// Attempts to consume one message from the user's daily quota.
///
/// Rolls the day over first, then lets an active premium bypass counting
/// entirely. For free users the check-and-increment happens in a single
/// conditional UPDATE, so the counter can never exceed `limit` however many
/// messages race. Any storage error propagates, which callers must treat as
/// a denial.
pub fn try_consume(conn: &Connection, user_id: i64, limit: i64) -> AppResult<ConsumeOutcome> {
    let today = today_local();
    db::rollover_daily(conn, user_id, &today)?;

    let user = db::get_user(conn, user_id)?.ok_or_else(|| AppError::Validation(format!("unknown user {}", user_id)))?;

    if is_entitled(user.premium_until.as_deref(), Utc::now()) {
        return Ok(ConsumeOutcome::Entitled);
    }

    if db::consume_quota(conn, user_id, &today, limit)? {
        let used = db::get_user(conn, user_id)?.map(|u| u.daily_used).unwrap_or(limit);
        Ok(ConsumeOutcome::Counted { used, limit })
    } else {
        Ok(ConsumeOutcome::LimitReached { limit })
    }
}

/// Grants `days` of premium, stacking on top of an already active premium.
///
/// If the current premium is still running the new expiry is the old expiry
/// plus `days`; otherwise it is now plus `days`. Returns the new expiry.
pub fn grant_or_extend_premium(conn: &Connection, user_id: i64, days: i64) -> AppResult<DateTime<Utc>> {
    let now = Utc::now();
    let user = db::get_user(conn, user_id)?.ok_or_else(|| AppError::Validation(format!("unknown user {}", user_id)))?;

    let base = user
        .premium_until
        .as_deref()
        .and_then(parse_premium_until)
        .filter(|until| *until > now)
        .unwrap_or(now);

    let until = base + Duration::days(days);
    db::set_premium_until(conn, user_id, &format_premium_until(until))?;

    log::info!(
        "Premium for user {} now runs until {}",
        user_id,
        format_premium_until(until)
    );
    Ok(until)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::migrate_schema(&conn).unwrap();
        conn
    }

    fn seed_user(conn: &Connection, user_id: i64) {
        db::create_user_if_absent(conn, user_id, None, None, &today_local()).unwrap();
    }

    #[test]
    fn test_resolve_creates_account_once() {
        let conn = test_conn();

        let first = resolve_user(&conn, 10, Some("bekzod"), None).unwrap();
        assert!(first.created);
        assert_eq!(first.user.daily_used, 0);

        let second = resolve_user(&conn, 10, Some("bekzod"), None).unwrap();
        assert!(!second.created);
        assert_eq!(second.credited_referrer, None);
    }

    #[test]
    fn test_referral_credited_exactly_once() {
        let conn = test_conn();
        seed_user(&conn, 1);

        let joined = resolve_user(&conn, 2, None, Some(1)).unwrap();
        assert_eq!(joined.credited_referrer, Some(1));
        assert_eq!(joined.user.referred_by, Some(1));

        // Same user resolving again must not credit the referrer a second time
        let again = resolve_user(&conn, 2, None, Some(1)).unwrap();
        assert!(!again.created);
        assert_eq!(again.credited_referrer, None);

        let referrer = db::get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(referrer.referral_count, 1);
    }

    #[test]
    fn test_referral_grants_premium_to_referrer() {
        let conn = test_conn();
        seed_user(&conn, 1);

        resolve_user(&conn, 2, None, Some(1)).unwrap();

        let referrer = db::get_user(&conn, 1).unwrap().unwrap();
        assert!(is_entitled(referrer.premium_until.as_deref(), Utc::now()));

        let until = parse_premium_until(referrer.premium_until.as_deref().unwrap()).unwrap();
        let expected = Utc::now() + Duration::days(*config::referral::BONUS_DAYS);
        assert!(until <= expected);
        assert!(until > expected - Duration::minutes(1));
    }

    #[test]
    fn test_self_referral_is_rejected() {
        let conn = test_conn();

        let joined = resolve_user(&conn, 5, None, Some(5)).unwrap();
        assert!(joined.created);
        assert_eq!(joined.credited_referrer, None);
        assert_eq!(joined.user.referred_by, None);
        assert_eq!(joined.user.referral_count, 0);
    }

    #[test]
    fn test_unknown_referrer_is_ignored() {
        let conn = test_conn();

        let joined = resolve_user(&conn, 5, None, Some(999)).unwrap();
        assert!(joined.created);
        assert_eq!(joined.credited_referrer, None);
        assert_eq!(joined.user.referred_by, None);
    }

    #[test]
    fn test_consume_counts_up_to_limit_then_denies() {
        let conn = test_conn();
        seed_user(&conn, 1);

        for n in 1..=3 {
            let outcome = try_consume(&conn, 1, 3).unwrap();
            assert_eq!(outcome, ConsumeOutcome::Counted { used: n, limit: 3 });
        }

        let denied = try_consume(&conn, 1, 3).unwrap();
        assert_eq!(denied, ConsumeOutcome::LimitReached { limit: 3 });
        assert!(!denied.is_allowed());

        // Counter must not run past the limit
        assert_eq!(db::get_user(&conn, 1).unwrap().unwrap().daily_used, 3);
    }

    #[test]
    fn test_consume_rolls_over_on_new_day() {
        let conn = test_conn();
        seed_user(&conn, 1);
        conn.execute(
            "UPDATE users SET usage_date = '2020-01-01', daily_used = 10 WHERE user_id = 1",
            [],
        )
        .unwrap();

        let outcome = try_consume(&conn, 1, 10).unwrap();
        assert_eq!(outcome, ConsumeOutcome::Counted { used: 1, limit: 10 });

        let user = db::get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(user.usage_date, today_local());
        assert_eq!(user.daily_used, 1);
    }

    #[test]
    fn test_entitled_user_bypasses_counting() {
        let conn = test_conn();
        seed_user(&conn, 1);
        grant_or_extend_premium(&conn, 1, 30).unwrap();

        for _ in 0..20 {
            assert_eq!(try_consume(&conn, 1, 3).unwrap(), ConsumeOutcome::Entitled);
        }

        assert_eq!(db::get_user(&conn, 1).unwrap().unwrap().daily_used, 0);
    }

    #[test]
    fn test_expired_premium_counts_again() {
        let conn = test_conn();
        seed_user(&conn, 1);
        db::set_premium_until(&conn, 1, "2020-01-01 00:00:00").unwrap();

        let outcome = try_consume(&conn, 1, 10).unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Counted { used: 1, .. }));
    }

    #[test]
    fn test_grant_stacks_on_active_premium() {
        let conn = test_conn();
        seed_user(&conn, 1);
        db::set_premium_until(&conn, 1, "2030-01-01 00:00:00").unwrap();

        grant_or_extend_premium(&conn, 1, 3).unwrap();

        let user = db::get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(user.premium_until.as_deref(), Some("2030-01-04 00:00:00"));
    }

    #[test]
    fn test_grant_restarts_after_expiry() {
        let conn = test_conn();
        seed_user(&conn, 1);
        db::set_premium_until(&conn, 1, "2020-01-01 00:00:00").unwrap();

        let until = grant_or_extend_premium(&conn, 1, 3).unwrap();

        let expected = Utc::now() + Duration::days(3);
        assert!(until <= expected);
        assert!(until > expected - Duration::minutes(1));
    }

    #[test]
    fn test_two_referrals_stack_additively() {
        let conn = test_conn();
        seed_user(&conn, 1);

        resolve_user(&conn, 2, None, Some(1)).unwrap();
        resolve_user(&conn, 3, None, Some(1)).unwrap();

        let referrer = db::get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(referrer.referral_count, 2);

        let until = parse_premium_until(referrer.premium_until.as_deref().unwrap()).unwrap();
        let expected = Utc::now() + Duration::days(2 * *config::referral::BONUS_DAYS);
        assert!(until <= expected);
        assert!(until > expected - Duration::minutes(1));
    }

    #[test]
    fn test_is_entitled_boundaries() {
        let now = Utc::now();
        let now_s = format_premium_until(now);
        let exactly_now = parse_premium_until(&now_s).unwrap();

        // Expiry exactly at "now" is already over
        assert!(!is_entitled(Some(&now_s), exactly_now));
        assert!(is_entitled(
            Some(&format_premium_until(now + Duration::seconds(2))),
            exactly_now
        ));
        assert!(!is_entitled(Some("not-a-timestamp"), now));
        assert!(!is_entitled(None, now));
    }
}
