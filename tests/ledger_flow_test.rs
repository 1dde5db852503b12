//! Integration tests for the quota and entitlement ledger
//!
//! Exercises the public crate API end to end against a pooled on-disk
//! SQLite database, the way the handlers use it in production.
//!
//! Run with: cargo test --test ledger_flow_test

use chrono::{Duration, Utc};
use tempfile::TempDir;

use ustozbot::core::entitlement::{
    format_premium_until, grant_or_extend_premium, parse_premium_until, resolve_user, try_consume, ConsumeOutcome,
};
use ustozbot::core::{config, sweep};
use ustozbot::storage::db;
use ustozbot::storage::{create_pool, get_connection, DbPool};

fn temp_pool(dir: &TempDir) -> DbPool {
    let path = dir.path().join("ledger.sqlite");
    create_pool(path.to_str().unwrap()).unwrap()
}

// ============================================================================
// Daily Quota Tests
// ============================================================================

mod quota_tests {
    use super::*;

    #[test]
    fn test_limit_is_enforced_across_pooled_connections() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);

        {
            let conn = get_connection(&pool).unwrap();
            resolve_user(&conn, 100, Some("aziza"), None).unwrap();
        }

        // Every message grabs its own connection, like concurrent handlers do
        for n in 1..=4 {
            let conn = get_connection(&pool).unwrap();
            let outcome = try_consume(&conn, 100, 4).unwrap();
            assert_eq!(outcome, ConsumeOutcome::Counted { used: n, limit: 4 });
        }

        let conn = get_connection(&pool).unwrap();
        assert_eq!(
            try_consume(&conn, 100, 4).unwrap(),
            ConsumeOutcome::LimitReached { limit: 4 }
        );
        assert_eq!(db::get_user(&conn, 100).unwrap().unwrap().daily_used, 4);
    }

    #[test]
    fn test_new_day_restarts_the_counter() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);
        let conn = get_connection(&pool).unwrap();

        resolve_user(&conn, 100, None, None).unwrap();
        conn.execute(
            "UPDATE users SET usage_date = '2020-01-01', daily_used = 10 WHERE user_id = 100",
            [],
        )
        .unwrap();

        let outcome = try_consume(&conn, 100, 10).unwrap();
        assert_eq!(outcome, ConsumeOutcome::Counted { used: 1, limit: 10 });
    }
}

// ============================================================================
// Referral Program Tests
// ============================================================================

mod referral_tests {
    use super::*;

    #[test]
    fn test_each_referral_counts_and_pays_out_once() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);
        let conn = get_connection(&pool).unwrap();
        let bonus = *config::referral::BONUS_DAYS;

        resolve_user(&conn, 1, Some("ustoz"), None).unwrap();

        let friend = resolve_user(&conn, 2, None, Some(1)).unwrap();
        assert!(friend.created);
        assert_eq!(friend.credited_referrer, Some(1));
        assert_eq!(friend.user.referred_by, Some(1));

        // The same friend pressing /start again changes nothing
        let repeat = resolve_user(&conn, 2, None, Some(1)).unwrap();
        assert!(!repeat.created);
        assert_eq!(repeat.credited_referrer, None);

        // A second friend stacks another bonus on the running premium
        resolve_user(&conn, 3, None, Some(1)).unwrap();

        let referrer = db::get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(referrer.referral_count, 2);

        let until = parse_premium_until(referrer.premium_until.as_deref().unwrap()).unwrap();
        let expected = Utc::now() + Duration::days(2 * bonus);
        assert!(until <= expected);
        assert!(until > expected - Duration::minutes(1));
    }

    #[test]
    fn test_self_and_unknown_referrers_do_not_pay_out() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);
        let conn = get_connection(&pool).unwrap();

        let own_link = resolve_user(&conn, 7, None, Some(7)).unwrap();
        assert!(own_link.created);
        assert_eq!(own_link.credited_referrer, None);
        assert_eq!(own_link.user.referred_by, None);

        let ghost_link = resolve_user(&conn, 8, None, Some(12345)).unwrap();
        assert_eq!(ghost_link.credited_referrer, None);
        assert_eq!(ghost_link.user.referred_by, None);
    }
}

// ============================================================================
// Premium Entitlement Tests
// ============================================================================

mod premium_tests {
    use super::*;

    #[test]
    fn test_premium_bypasses_metering_until_it_lapses() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);
        let conn = get_connection(&pool).unwrap();

        resolve_user(&conn, 1, None, None).unwrap();
        grant_or_extend_premium(&conn, 1, 30).unwrap();

        for _ in 0..15 {
            assert_eq!(try_consume(&conn, 1, 3).unwrap(), ConsumeOutcome::Entitled);
        }
        assert_eq!(db::get_user(&conn, 1).unwrap().unwrap().daily_used, 0);

        // Once the premium lies in the past the meter starts again
        let lapsed = format_premium_until(Utc::now() - Duration::hours(1));
        db::set_premium_until(&conn, 1, &lapsed).unwrap();

        let outcome = try_consume(&conn, 1, 3).unwrap();
        assert_eq!(outcome, ConsumeOutcome::Counted { used: 1, limit: 3 });
    }

    #[test]
    fn test_paid_days_stack_on_referral_days() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);
        let conn = get_connection(&pool).unwrap();
        let bonus = *config::referral::BONUS_DAYS;

        resolve_user(&conn, 1, None, None).unwrap();
        resolve_user(&conn, 2, None, Some(1)).unwrap();
        grant_or_extend_premium(&conn, 1, config::premium::PAID_DAYS).unwrap();

        let referrer = db::get_user(&conn, 1).unwrap().unwrap();
        let until = parse_premium_until(referrer.premium_until.as_deref().unwrap()).unwrap();
        let expected = Utc::now() + Duration::days(bonus + config::premium::PAID_DAYS);
        assert!(until <= expected);
        assert!(until > expected - Duration::minutes(1));
    }
}

// ============================================================================
// Expiry Sweep Tests
// ============================================================================

mod sweep_tests {
    use super::*;

    #[test]
    fn test_sweep_notices_each_expiry_exactly_once() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);
        let conn = get_connection(&pool).unwrap();

        for user_id in [1, 2, 3] {
            resolve_user(&conn, user_id, None, None).unwrap();
        }
        db::set_premium_until(&conn, 1, &format_premium_until(Utc::now() - Duration::hours(1))).unwrap();
        db::set_premium_until(&conn, 2, &format_premium_until(Utc::now() + Duration::hours(1))).unwrap();

        let report = sweep::run_sweep(&conn, Utc::now()).unwrap();
        assert_eq!(report.expired, vec![1]);
        assert_eq!(report.failures, 0);

        // The still-active premium and the free user are untouched
        assert!(db::get_user(&conn, 2).unwrap().unwrap().premium_until.is_some());
        assert!(db::get_user(&conn, 3).unwrap().unwrap().premium_until.is_none());

        // A second pass finds nothing left to clear
        let second = sweep::run_sweep(&conn, Utc::now()).unwrap();
        assert_eq!(second.scanned, 0);
        assert!(second.expired.is_empty());
    }
}

// ============================================================================
// Full Ledger Lifecycle
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_referral_premium_lifecycle() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir);
        let referrer = 1001;
        let friend = 2002;

        // Day one: the referrer uses part of their free quota
        {
            let conn = get_connection(&pool).unwrap();
            resolve_user(&conn, referrer, Some("dilnoza"), None).unwrap();
            for n in 1..=2 {
                assert_eq!(
                    try_consume(&conn, referrer, 10).unwrap(),
                    ConsumeOutcome::Counted { used: n, limit: 10 }
                );
            }
        }

        // A friend joins through the referral link
        {
            let conn = get_connection(&pool).unwrap();
            let joined = resolve_user(&conn, friend, None, Some(referrer)).unwrap();
            assert!(joined.created);
            assert_eq!(joined.credited_referrer, Some(referrer));
        }

        // The referrer is premium now: unmetered, counter untouched
        {
            let conn = get_connection(&pool).unwrap();
            assert_eq!(try_consume(&conn, referrer, 10).unwrap(), ConsumeOutcome::Entitled);
            assert_eq!(db::get_user(&conn, referrer).unwrap().unwrap().daily_used, 2);
        }

        // Time passes, the premium runs out and the sweeper clears it once
        {
            let conn = get_connection(&pool).unwrap();
            let lapsed = format_premium_until(Utc::now() - Duration::minutes(5));
            db::set_premium_until(&conn, referrer, &lapsed).unwrap();

            let report = sweep::run_sweep(&conn, Utc::now()).unwrap();
            assert_eq!(report.expired, vec![referrer]);
            assert!(sweep::run_sweep(&conn, Utc::now()).unwrap().expired.is_empty());
        }

        // Back on the free tier, metering picks up where it left off
        {
            let conn = get_connection(&pool).unwrap();
            assert_eq!(
                try_consume(&conn, referrer, 10).unwrap(),
                ConsumeOutcome::Counted { used: 3, limit: 10 }
            );
        }
    }
}
