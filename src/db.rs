use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::models::{
    AdminOverview, NewPayment, Payment, Question, QuestionAverage, QuestionLink, RaterBreakdown,
    Rating, SavePaymentOutcome, Statistics, SubscriptionPrice, User, Voter,
};
use crate::subscription::{PaymentStatus, Period, Plan};

pub const PAYMENT_TRANSACTION_CONSTRAINT: &str = "payments_transaction_id_key";
pub const PAYMENT_PENDING_INDEX: &str = "payments_one_pending_per_user";

const SCHEMA: &[(&str, &str)] = &[
    (
        "users table",
        "CREATE TABLE IF NOT EXISTS users (
            telegram_id BIGINT PRIMARY KEY,
            first_name TEXT,
            username TEXT,
            link_token TEXT UNIQUE,
            link_created_at TIMESTAMPTZ,
            is_admin BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "ratings table",
        "CREATE TABLE IF NOT EXISTS ratings (
            id BIGSERIAL PRIMARY KEY,
            rater_user_id BIGINT NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            rated_user_id BIGINT NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            score SMALLINT NOT NULL CHECK (score BETWEEN 1 AND 5),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT ratings_rater_rated_key UNIQUE (rater_user_id, rated_user_id),
            CONSTRAINT ratings_no_self_rating CHECK (rater_user_id <> rated_user_id)
        )",
    ),
    (
        "ratings index",
        "CREATE INDEX IF NOT EXISTS ratings_rated_created_idx ON ratings (rated_user_id, created_at)",
    ),
    (
        "payments table",
        "CREATE TABLE IF NOT EXISTS payments (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            amount NUMERIC(10, 2) NOT NULL,
            transaction_id TEXT NOT NULL,
            payment_url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'success')),
            period TEXT NOT NULL,
            is_vip BOOLEAN NOT NULL DEFAULT FALSE,
            access_start TIMESTAMPTZ NOT NULL,
            access_end TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT payments_transaction_id_key UNIQUE (transaction_id)
        )",
    ),
    (
        "pending payment index",
        "CREATE UNIQUE INDEX IF NOT EXISTS payments_one_pending_per_user
            ON payments (user_id) WHERE status = 'pending'",
    ),
    (
        "subscription_prices table",
        "CREATE TABLE IF NOT EXISTS subscription_prices (
            period TEXT NOT NULL,
            is_vip BOOLEAN NOT NULL,
            price NUMERIC(10, 2) NOT NULL CHECK (price > 0),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (period, is_vip)
        )",
    ),
    (
        "questions table",
        "CREATE TABLE IF NOT EXISTS questions (
            id BIGSERIAL PRIMARY KEY,
            text TEXT NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ),
    (
        "question_links table",
        "CREATE TABLE IF NOT EXISTS question_links (
            token TEXT PRIMARY KEY,
            owner_id BIGINT NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            created_at TIMESTAMPTZ NOT NULL
        )",
    ),
    (
        "question_link_items table",
        "CREATE TABLE IF NOT EXISTS question_link_items (
            token TEXT NOT NULL REFERENCES question_links(token) ON DELETE CASCADE,
            question_id BIGINT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (token, question_id)
        )",
    ),
    (
        "question_answers table",
        "CREATE TABLE IF NOT EXISTS question_answers (
            id BIGSERIAL PRIMARY KEY,
            token TEXT NOT NULL REFERENCES question_links(token) ON DELETE CASCADE,
            question_id BIGINT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            rater_user_id BIGINT NOT NULL REFERENCES users(telegram_id) ON DELETE CASCADE,
            score SMALLINT NOT NULL CHECK (score BETWEEN 1 AND 5),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (token, question_id, rater_user_id)
        )",
    ),
];

/// Open the shared connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    for (name, statement) in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {name}"))?;
    }

    info!("Database schema initialized successfully");
    Ok(())
}

/// Name of the unique constraint a failed statement tripped, if any
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str =
    "telegram_id, first_name, username, link_token, link_created_at, is_admin, created_at";

/// Create the user on first contact, refreshing the names afterwards
pub async fn set_user(
    pool: &PgPool,
    telegram_id: i64,
    first_name: Option<&str>,
    username: Option<&str>,
) -> Result<User> {
    debug!(user_id = telegram_id, "Upserting user");

    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (telegram_id, first_name, username)
         VALUES ($1, $2, $3)
         ON CONFLICT (telegram_id) DO UPDATE
            SET first_name = EXCLUDED.first_name, username = EXCLUDED.username
         RETURNING {USER_COLUMNS}"
    ))
    .bind(telegram_id)
    .bind(first_name)
    .bind(username)
    .fetch_one(pool)
    .await
    .context("Failed to upsert user")
}

pub async fn get_user(pool: &PgPool, telegram_id: i64) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = $1"
    ))
    .bind(telegram_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read user")
}

/// Look up a user by share token, regardless of the token's age
pub async fn get_user_by_token(pool: &PgPool, token: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE link_token = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("Failed to read user by token")
}

/// Store a new share token. Returns `false` when the token collides with
/// another user's token.
pub async fn set_link_token(
    pool: &PgPool,
    telegram_id: i64,
    token: &str,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE users SET link_token = $2, link_created_at = $3 WHERE telegram_id = $1",
    )
    .bind(telegram_id)
    .bind(token)
    .bind(created_at)
    .execute(pool)
    .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => {
            Err(anyhow::anyhow!("User {telegram_id} not found"))
        }
        Ok(_) => Ok(true),
        Err(e) if unique_violation(&e).is_some() => {
            warn!(user_id = telegram_id, "Share token collision");
            Ok(false)
        }
        Err(e) => Err(e).context("Failed to store share token"),
    }
}

pub async fn clear_link_token(pool: &PgPool, telegram_id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET link_token = NULL, link_created_at = NULL WHERE telegram_id = $1")
        .bind(telegram_id)
        .execute(pool)
        .await
        .context("Failed to clear share token")?;
    Ok(())
}

pub async fn is_admin(pool: &PgPool, telegram_id: i64) -> Result<bool> {
    let flag: Option<bool> =
        sqlx::query_scalar("SELECT is_admin FROM users WHERE telegram_id = $1")
            .bind(telegram_id)
            .fetch_optional(pool)
            .await
            .context("Failed to read admin flag")?;
    Ok(flag.unwrap_or(false))
}

/// Give a user the admin role, creating the row if needed
pub async fn grant_admin(pool: &PgPool, telegram_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (telegram_id, is_admin) VALUES ($1, TRUE)
         ON CONFLICT (telegram_id) DO UPDATE SET is_admin = TRUE",
    )
    .bind(telegram_id)
    .execute(pool)
    .await
    .context("Failed to grant admin role")?;
    info!(user_id = telegram_id, "Admin role granted");
    Ok(())
}

/// (total users, users holding a share token)
pub async fn count_users(pool: &PgPool) -> Result<(i64, i64)> {
    let row = sqlx::query("SELECT COUNT(*) AS total, COUNT(link_token) AS with_links FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;
    Ok((row.try_get("total")?, row.try_get("with_links")?))
}

// ---------------------------------------------------------------------------
// Ratings
// ---------------------------------------------------------------------------

pub async fn get_existing_rating(
    pool: &PgPool,
    rater_user_id: i64,
    rated_user_id: i64,
) -> Result<Option<Rating>> {
    sqlx::query_as::<_, Rating>(
        "SELECT id, rater_user_id, rated_user_id, score, created_at
         FROM ratings WHERE rater_user_id = $1 AND rated_user_id = $2",
    )
    .bind(rater_user_id)
    .bind(rated_user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read existing rating")
}

/// Insert a rating. Returns `false` if the pair was already rated.
pub async fn save_rating(
    pool: &PgPool,
    rater_user_id: i64,
    rated_user_id: i64,
    score: i16,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let done = sqlx::query(
        "INSERT INTO ratings (rater_user_id, rated_user_id, score, created_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT ON CONSTRAINT ratings_rater_rated_key DO NOTHING",
    )
    .bind(rater_user_id)
    .bind(rated_user_id)
    .bind(score)
    .bind(created_at)
    .execute(pool)
    .await
    .context("Failed to insert rating")?;

    Ok(done.rows_affected() == 1)
}

pub async fn get_ratings_for_user(pool: &PgPool, rated_user_id: i64) -> Result<Vec<Rating>> {
    sqlx::query_as::<_, Rating>(
        "SELECT id, rater_user_id, rated_user_id, score, created_at
         FROM ratings WHERE rated_user_id = $1 ORDER BY created_at",
    )
    .bind(rated_user_id)
    .fetch_all(pool)
    .await
    .context("Failed to list ratings")
}

pub async fn get_statistics(
    pool: &PgPool,
    rated_user_id: i64,
    since: DateTime<Utc>,
) -> Result<Statistics> {
    let row = sqlx::query(
        "SELECT AVG(score)::FLOAT8 AS average, COUNT(*) AS total
         FROM ratings WHERE rated_user_id = $1 AND created_at >= $2",
    )
    .bind(rated_user_id)
    .bind(since)
    .fetch_one(pool)
    .await
    .context("Failed to compute statistics")?;

    Ok(Statistics {
        average: row.try_get("average")?,
        total: row.try_get("total")?,
    })
}

pub async fn get_voters(pool: &PgPool, rated_user_id: i64) -> Result<Vec<Voter>> {
    let rows = sqlx::query(
        "SELECT r.rater_user_id, u.first_name, u.username, r.score, r.created_at
         FROM ratings r JOIN users u ON u.telegram_id = r.rater_user_id
         WHERE r.rated_user_id = $1
         ORDER BY r.created_at DESC",
    )
    .bind(rated_user_id)
    .fetch_all(pool)
    .await
    .context("Failed to list voters")?;

    rows.iter()
        .map(|row| {
            Ok(Voter {
                rater_id: row.try_get("rater_user_id")?,
                first_name: row.try_get("first_name")?,
                username: row.try_get("username")?,
                score: row.try_get("score")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

const PAYMENT_COLUMNS: &str = "id, user_id, amount, transaction_id, payment_url, status, period, \
                               is_vip, access_start, access_end, created_at";

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let status: String = row.try_get("status")?;
    let period: String = row.try_get("period")?;
    Ok(Payment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        transaction_id: row.try_get("transaction_id")?,
        payment_url: row.try_get("payment_url")?,
        status: status.parse()?,
        period: period.parse::<Period>()?,
        is_vip: row.try_get("is_vip")?,
        access_start: row.try_get("access_start")?,
        access_end: row.try_get("access_end")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn save_payment(pool: &PgPool, payment: &NewPayment) -> Result<SavePaymentOutcome> {
    info!(
        user_id = payment.user_id,
        amount = %payment.amount,
        period = %payment.plan.period,
        is_vip = payment.plan.is_vip,
        "Saving pending payment"
    );

    let result = sqlx::query(&format!(
        "INSERT INTO payments
            (user_id, amount, transaction_id, payment_url, status, period, is_vip,
             access_start, access_end, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING {PAYMENT_COLUMNS}"
    ))
    .bind(payment.user_id)
    .bind(payment.amount)
    .bind(&payment.transaction_id)
    .bind(&payment.payment_url)
    .bind(PaymentStatus::Pending.as_str())
    .bind(payment.plan.period.as_str())
    .bind(payment.plan.is_vip)
    .bind(payment.access_start)
    .bind(payment.access_end)
    .bind(payment.created_at)
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => Ok(SavePaymentOutcome::Saved(payment_from_row(&row)?)),
        Err(e) => match unique_violation(&e).as_deref() {
            Some(PAYMENT_TRANSACTION_CONSTRAINT) => Ok(SavePaymentOutcome::DuplicateTransaction),
            Some(PAYMENT_PENDING_INDEX) => Ok(SavePaymentOutcome::PendingExists),
            _ => Err(e).context("Failed to insert payment"),
        },
    }
}

/// Most recently created payment of the user, whatever its status
pub async fn get_last_payment(pool: &PgPool, user_id: i64) -> Result<Option<Payment>> {
    let row = sqlx::query(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1
         ORDER BY created_at DESC, id DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read last payment")?;

    row.as_ref().map(payment_from_row).transpose()
}

/// The user's pending payment, if any
pub async fn get_active_payment(pool: &PgPool, user_id: i64) -> Result<Option<Payment>> {
    let row = sqlx::query(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 AND status = 'pending'
         ORDER BY id DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("Failed to read active payment")?;

    row.as_ref().map(payment_from_row).transpose()
}

pub async fn delete_active_payment(pool: &PgPool, user_id: i64) -> Result<u64> {
    let done = sqlx::query("DELETE FROM payments WHERE user_id = $1 AND status = 'pending'")
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to delete active payment")?;
    Ok(done.rows_affected())
}

/// Move a payment from pending to success. Returns `false` if the row is
/// gone or was not pending.
pub async fn mark_payment_success(pool: &PgPool, payment_id: i64) -> Result<bool> {
    let done = sqlx::query(
        "UPDATE payments SET status = 'success' WHERE id = $1 AND status = 'pending'",
    )
    .bind(payment_id)
    .execute(pool)
    .await
    .context("Failed to mark payment as paid")?;
    Ok(done.rows_affected() == 1)
}

/// Paid payments whose access window is still open
pub async fn get_access_payments(
    pool: &PgPool,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Payment>> {
    let rows = sqlx::query(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE user_id = $1 AND status = 'success' AND access_end > $2
         ORDER BY access_end DESC"
    ))
    .bind(user_id)
    .bind(now)
    .fetch_all(pool)
    .await
    .context("Failed to read paid payments")?;

    rows.iter().map(payment_from_row).collect()
}

/// Delete pending payments older than `grace` and any payment whose access
/// window has elapsed.
pub async fn delete_expired_payments(
    pool: &PgPool,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<u64> {
    let done = sqlx::query(
        "DELETE FROM payments
         WHERE (status = 'pending' AND created_at < $1) OR access_end <= $2",
    )
    .bind(now - grace)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to delete expired payments")?;
    Ok(done.rows_affected())
}

pub async fn admin_overview(pool: &PgPool) -> Result<AdminOverview> {
    let (total_users, users_with_links) = count_users(pool).await?;

    let row = sqlx::query(
        "SELECT
            COUNT(*) FILTER (WHERE NOT is_vip) AS normal_payments,
            COUNT(*) FILTER (WHERE is_vip) AS vip_payments,
            COALESCE(SUM(amount) FILTER (WHERE NOT is_vip), 0) AS total_normal,
            COALESCE(SUM(amount) FILTER (WHERE is_vip), 0) AS total_vip
         FROM payments WHERE status = 'success'",
    )
    .fetch_one(pool)
    .await
    .context("Failed to summarise payments")?;

    Ok(AdminOverview {
        total_users,
        users_with_links,
        normal_payments: row.try_get("normal_payments")?,
        vip_payments: row.try_get("vip_payments")?,
        total_normal: row.try_get("total_normal")?,
        total_vip: row.try_get("total_vip")?,
    })
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

pub async fn get_subscription_price(pool: &PgPool, plan: Plan) -> Result<Option<Decimal>> {
    sqlx::query_scalar("SELECT price FROM subscription_prices WHERE period = $1 AND is_vip = $2")
        .bind(plan.period.as_str())
        .bind(plan.is_vip)
        .fetch_optional(pool)
        .await
        .context("Failed to read subscription price")
}

pub async fn list_subscription_prices(pool: &PgPool) -> Result<Vec<SubscriptionPrice>> {
    let rows = sqlx::query(
        "SELECT period, is_vip, price FROM subscription_prices ORDER BY is_vip, period",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list subscription prices")?;

    rows.iter()
        .map(|row| {
            let period: String = row.try_get("period")?;
            Ok(SubscriptionPrice {
                plan: Plan {
                    period: period.parse()?,
                    is_vip: row.try_get("is_vip")?,
                },
                price: row.try_get("price")?,
            })
        })
        .collect()
}

/// Upsert a price inside one transaction; any failure rolls it back.
pub async fn update_subscription_price(pool: &PgPool, plan: Plan, price: Decimal) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to open transaction")?;

    let current: Option<Decimal> = sqlx::query_scalar(
        "SELECT price FROM subscription_prices WHERE period = $1 AND is_vip = $2 FOR UPDATE",
    )
    .bind(plan.period.as_str())
    .bind(plan.is_vip)
    .fetch_optional(&mut *tx)
    .await
    .context("Failed to lock subscription price")?;

    if current.is_some() {
        sqlx::query(
            "UPDATE subscription_prices SET price = $3, updated_at = NOW()
             WHERE period = $1 AND is_vip = $2",
        )
        .bind(plan.period.as_str())
        .bind(plan.is_vip)
        .bind(price)
        .execute(&mut *tx)
        .await
        .context("Failed to update subscription price")?;
    } else {
        sqlx::query("INSERT INTO subscription_prices (period, is_vip, price) VALUES ($1, $2, $3)")
            .bind(plan.period.as_str())
            .bind(plan.is_vip)
            .bind(price)
            .execute(&mut *tx)
            .await
            .context("Failed to insert subscription price")?;
    }

    tx.commit().await.context("Failed to commit price update")?;
    info!(period = %plan.period, is_vip = plan.is_vip, price = %price, previous = ?current, "Subscription price updated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

/// Insert a question. Returns `None` if the same text already exists.
pub async fn add_question(pool: &PgPool, text: &str) -> Result<Option<Question>> {
    sqlx::query_as::<_, Question>(
        "INSERT INTO questions (text) VALUES ($1)
         ON CONFLICT (text) DO NOTHING RETURNING id, text",
    )
    .bind(text)
    .fetch_optional(pool)
    .await
    .context("Failed to insert question")
}

pub async fn question_exists(pool: &PgPool, text: &str) -> Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM questions WHERE text = $1)")
        .bind(text)
        .fetch_one(pool)
        .await
        .context("Failed to look up question")
}

pub async fn list_questions(pool: &PgPool) -> Result<Vec<Question>> {
    sqlx::query_as::<_, Question>("SELECT id, text FROM questions ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to list questions")
}

/// Create a poll link. Returns `false` when the token is already taken.
pub async fn create_question_link(
    pool: &PgPool,
    owner_id: i64,
    token: &str,
    question_ids: &[i64],
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to open transaction")?;

    let inserted =
        sqlx::query("INSERT INTO question_links (token, owner_id, created_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(owner_id)
            .bind(created_at)
            .execute(&mut *tx)
            .await;
    if let Err(e) = inserted {
        if unique_violation(&e).is_some() {
            warn!(user_id = owner_id, "Poll token collision");
            return Ok(false);
        }
        return Err(e).context("Failed to insert question link");
    }

    for (position, question_id) in question_ids.iter().enumerate() {
        sqlx::query(
            "INSERT INTO question_link_items (token, question_id, position) VALUES ($1, $2, $3)",
        )
        .bind(token)
        .bind(question_id)
        .bind(position as i32)
        .execute(&mut *tx)
        .await
        .context("Failed to attach question to link")?;
    }

    tx.commit().await.context("Failed to commit question link")?;
    Ok(true)
}

pub async fn get_question_link(pool: &PgPool, token: &str) -> Result<Option<QuestionLink>> {
    let Some(row) =
        sqlx::query("SELECT token, owner_id, created_at FROM question_links WHERE token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await
            .context("Failed to read question link")?
    else {
        return Ok(None);
    };

    let questions = sqlx::query_as::<_, Question>(
        "SELECT q.id, q.text FROM question_link_items i
         JOIN questions q ON q.id = i.question_id
         WHERE i.token = $1 ORDER BY i.position",
    )
    .bind(token)
    .fetch_all(pool)
    .await
    .context("Failed to read link questions")?;

    Ok(Some(QuestionLink {
        token: row.try_get("token")?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        questions,
    }))
}

pub async fn has_answered_poll(pool: &PgPool, token: &str, rater_user_id: i64) -> Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM question_answers WHERE token = $1 AND rater_user_id = $2)",
    )
    .bind(token)
    .bind(rater_user_id)
    .fetch_one(pool)
    .await
    .context("Failed to check poll answers")
}

/// Insert one poll answer. Returns `false` if this question was already
/// answered by the rater on this link.
pub async fn save_question_answer(
    pool: &PgPool,
    token: &str,
    question_id: i64,
    rater_user_id: i64,
    score: i16,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let done = sqlx::query(
        "INSERT INTO question_answers (token, question_id, rater_user_id, score, created_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (token, question_id, rater_user_id) DO NOTHING",
    )
    .bind(token)
    .bind(question_id)
    .bind(rater_user_id)
    .bind(score)
    .bind(created_at)
    .execute(pool)
    .await
    .context("Failed to insert poll answer")?;
    Ok(done.rows_affected() == 1)
}

pub async fn get_poll_averages(pool: &PgPool, owner_id: i64) -> Result<Vec<QuestionAverage>> {
    let rows = sqlx::query(
        "SELECT q.id, q.text, AVG(a.score)::FLOAT8 AS average, COUNT(*) AS answers
         FROM question_answers a
         JOIN question_links l ON l.token = a.token
         JOIN questions q ON q.id = a.question_id
         WHERE l.owner_id = $1
         GROUP BY q.id, q.text ORDER BY q.id",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("Failed to compute poll averages")?;

    rows.iter()
        .map(|row| {
            Ok(QuestionAverage {
                question_id: row.try_get("id")?,
                text: row.try_get("text")?,
                average: row.try_get("average")?,
                answers: row.try_get("answers")?,
            })
        })
        .collect()
}

pub async fn get_poll_breakdown(pool: &PgPool, owner_id: i64) -> Result<Vec<RaterBreakdown>> {
    let rows = sqlx::query(
        "SELECT a.rater_user_id, u.username, q.id, q.text,
                AVG(a.score)::FLOAT8 AS average, COUNT(*) AS answers
         FROM question_answers a
         JOIN question_links l ON l.token = a.token
         JOIN questions q ON q.id = a.question_id
         JOIN users u ON u.telegram_id = a.rater_user_id
         WHERE l.owner_id = $1
         GROUP BY a.rater_user_id, u.username, q.id, q.text
         ORDER BY a.rater_user_id, q.id",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("Failed to compute poll breakdown")?;

    let mut breakdown: Vec<RaterBreakdown> = Vec::new();
    for row in &rows {
        let rater_id: i64 = row.try_get("rater_user_id")?;
        let answer = QuestionAverage {
            question_id: row.try_get("id")?,
            text: row.try_get("text")?,
            average: row.try_get("average")?,
            answers: row.try_get("answers")?,
        };
        match breakdown.last_mut() {
            Some(last) if last.rater_id == rater_id => last.answers.push(answer),
            _ => breakdown.push(RaterBreakdown {
                rater_id,
                username: row.try_get("username")?,
                answers: vec![answer],
            }),
        }
    }
    Ok(breakdown)
}
