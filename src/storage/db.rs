use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result};

/// Одна строка таблицы `users`.
///
/// Счётчик `daily_used` имеет смысл только в паре с `usage_date`: если дата
/// устарела, счётчик подлежит сбросу.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Telegram ID, первичный ключ
    pub user_id: i64,
    /// Username в Telegram, может отсутствовать
    pub username: Option<String>,
    /// Количество сообщений, израсходованных за день `usage_date`
    pub daily_used: i64,
    /// Дата, к которой относится `daily_used` (формат YYYY-MM-DD, локальное время)
    pub usage_date: String,
    /// Момент окончания премиума в UTC ("%Y-%m-%d %H:%M:%S"), None если премиума нет
    pub premium_until: Option<String>,
    /// Сколько новых пользователей пришло по реферальной ссылке этого пользователя
    pub referral_count: i64,
    /// Кто пригласил этого пользователя (выставляется один раз при создании)
    pub referred_by: Option<i64>,
}

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Открывает пул соединений к файлу SQLite и прогоняет миграцию схемы на
/// первом соединении.
///
/// ```no_run
/// use ustozbot::storage::db;
///
/// let pool = db::create_pool("ustozbot.sqlite").expect("pool");
/// ```
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    // Десяти соединений с запасом хватает одному long-polling боту
    let pool = Pool::builder().max_size(10).build(manager)?;

    let conn = pool.get()?;
    if let Err(e) = migrate_schema(&conn) {
        // Бот может работать и со старой схемой, поэтому не падаем
        log::warn!("Failed to migrate schema: {}", e);
    }

    Ok(pool)
}

/// Берёт соединение из пула; при `drop` оно вернётся обратно само.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Приводит схему к актуальному виду: создаёт таблицы и добавляет в
/// `users` колонки, которых не было в ранних версиях. Все шаги идемпотентны.
pub(crate) fn migrate_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            daily_used INTEGER NOT NULL DEFAULT 0,
            usage_date TEXT NOT NULL DEFAULT '',
            premium_until TEXT DEFAULT NULL,
            referral_count INTEGER NOT NULL DEFAULT 0,
            referred_by INTEGER DEFAULT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // Базы, созданные до реферальной программы и премиума, не знают этих
    // колонок - добавляем недостающие
    let columns = user_table_columns(conn)?;
    let wanted = [
        ("premium_until", "ALTER TABLE users ADD COLUMN premium_until TEXT DEFAULT NULL"),
        (
            "referral_count",
            "ALTER TABLE users ADD COLUMN referral_count INTEGER NOT NULL DEFAULT 0",
        ),
        ("referred_by", "ALTER TABLE users ADD COLUMN referred_by INTEGER DEFAULT NULL"),
    ];
    for (name, ddl) in wanted {
        if columns.iter().any(|c| c == name) {
            continue;
        }
        log::info!("users table is missing column {}, adding it", name);
        if let Err(e) = conn.execute(ddl, []) {
            log::warn!("Could not add column {}: {}", name, e);
        }
    }

    // Индекс держит часовой обход премиумов дешёвым при любом числе пользователей
    if let Err(e) = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_premium_until ON users(premium_until)",
        [],
    ) {
        log::warn!("Failed to create index on users: {}", e);
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS star_payments (
            charge_id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            stars INTEGER NOT NULL,
            payload TEXT NOT NULL,
            paid_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    Ok(())
}

fn user_table_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(users)")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.collect()
}

/// Создаёт пользователя, если его ещё нет в базе.
///
/// Вставка выполняется через `INSERT OR IGNORE`, поэтому повторный вызов
/// для существующего пользователя ничего не меняет. Возвращаемое значение
/// отличает настоящее создание от повторного обращения - на нём построена
/// гарантия "реферал засчитывается ровно один раз".
///
/// `referred_by` сюда приходит уже проверенным: не сам пользователь и
/// реально существующий аккаунт.
pub fn create_user_if_absent(
    conn: &Connection,
    user_id: i64,
    username: Option<&str>,
    referred_by: Option<i64>,
    today: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO users (user_id, username, daily_used, usage_date, referral_count, referred_by)
         VALUES (?1, ?2, 0, ?3, 0, ?4)",
        params![user_id, username, today, referred_by],
    )?;
    Ok(rows == 1)
}

/// Читает строку пользователя; `None`, если такого ID в базе нет.
pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT user_id, username, daily_used, usage_date, premium_until, referral_count, referred_by
         FROM users WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(User {
                user_id: row.get(0)?,
                username: row.get(1)?,
                daily_used: row.get(2)?,
                usage_date: row.get(3)?,
                premium_until: row.get(4)?,
                referral_count: row.get(5)?,
                referred_by: row.get(6)?,
            })
        },
    )
    .optional()
}

/// Сбрасывает дневной счётчик, если сохранённая дата не совпадает с текущей.
///
/// Условие `usage_date <> ?2` делает операцию идемпотентной: при гонке двух
/// конкурентных сообщений сброс выполнит ровно один из вызовов. Возвращает
/// `true`, если сброс сделал именно этот вызов.
pub fn rollover_daily(conn: &Connection, user_id: i64, today: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE users SET daily_used = 0, usage_date = ?2
         WHERE user_id = ?1 AND usage_date <> ?2",
        params![user_id, today],
    )?;
    Ok(rows == 1)
}

/// Атомарно списывает одно сообщение из дневной квоты.
///
/// Проверка `daily_used < limit` и инкремент выполняются одним UPDATE,
/// поэтому конкурентные сообщения не могут превысить лимит. Условие по
/// `usage_date` защищает от списания в уже устаревший день. `false` значит
/// "лимит исчерпан" (или дата успела смениться).
pub fn consume_quota(conn: &Connection, user_id: i64, today: &str, limit: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE users SET daily_used = daily_used + 1
         WHERE user_id = ?1 AND usage_date = ?2 AND daily_used < ?3",
        params![user_id, today, limit],
    )?;
    Ok(rows == 1)
}

/// Записывает момент окончания премиума (UTC, "%Y-%m-%d %H:%M:%S").
pub fn set_premium_until(conn: &Connection, user_id: i64, until: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET premium_until = ?2 WHERE user_id = ?1",
        params![user_id, until],
    )?;
    Ok(())
}

/// Увеличивает счётчик рефералов пользователя на единицу.
pub fn increment_referral_count(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET referral_count = referral_count + 1 WHERE user_id = ?1",
        params![user_id],
    )?;
    Ok(())
}

/// Снимает премиум, если он действительно истёк к моменту `now`.
///
/// Повторная проверка срока в условии UPDATE гарантирует, что премиум,
/// продлённый между выборкой кандидатов и записью, не будет снят, а также
/// что из двух конкурентных прогонов уведомление отправит ровно один.
pub fn clear_premium_if_expired(conn: &Connection, user_id: i64, now: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE users SET premium_until = NULL
         WHERE user_id = ?1 AND premium_until IS NOT NULL AND premium_until < ?2",
        params![user_id, now],
    )?;
    Ok(rows == 1)
}

/// Возвращает пользователей, чей премиум истёк к моменту `now`.
pub fn list_expired_premium(conn: &Connection, now: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM users
         WHERE premium_until IS NOT NULL AND premium_until < ?1",
    )?;
    let ids = stmt.query_map(params![now], |row| row.get::<_, i64>(0))?;
    ids.collect()
}

/// Сбрасывает дневные счётчики всех пользователей разом. Возвращает число
/// затронутых строк.
pub fn reset_all_daily_counters(conn: &Connection, today: &str) -> Result<usize> {
    let count = conn.execute("UPDATE users SET daily_used = 0, usage_date = ?1", params![today])?;

    if count > 0 {
        log::info!("Reset daily counters for {} user(s)", count);
    }

    Ok(count)
}

/// Общее количество пользователей.
pub fn count_users(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
}

/// Количество пользователей с действующим премиумом на момент `now`.
pub fn count_premium_users(conn: &Connection, now: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE premium_until IS NOT NULL AND premium_until > ?1",
        params![now],
        |row| row.get(0),
    )
}

/// Сумма сообщений, израсходованных всеми пользователями за дату `today`.
pub fn sum_daily_used(conn: &Connection, today: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(daily_used), 0) FROM users WHERE usage_date = ?1",
        params![today],
        |row| row.get(0),
    )
}

/// Сохраняет запись об оплате Stars для бухгалтерии.
///
/// `charge_id` уникален на стороне Telegram; `INSERT OR IGNORE` защищает
/// от повторной доставки того же события оплаты.
pub fn record_star_payment(conn: &Connection, charge_id: &str, user_id: i64, stars: i64, payload: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO star_payments (charge_id, user_id, stars, payload) VALUES (?1, ?2, ?3, ?4)",
        params![charge_id, user_id, stars, payload],
    )?;
    Ok(())
}
