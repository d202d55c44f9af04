//! # Storage Seams
//!
//! Persistence accessor traits consumed by the services and the bot layer.
//! [`PgStorage`] backs them with Postgres through the functions in
//! [`crate::db`]; [`crate::memory_storage::MemoryStorage`] keeps everything
//! in process for tests.
//!
//! Every method that depends on the current time takes it as an argument so
//! both backends agree on expiry decisions.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;

use crate::db;
use crate::models::{
    AdminOverview, NewPayment, Payment, Question, QuestionAverage, QuestionLink, RaterBreakdown,
    Rating, SavePaymentOutcome, Statistics, SubscriptionPrice, User, Voter,
};
use crate::subscription::Plan;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn set_user(
        &self,
        telegram_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
    ) -> Result<User>;
    async fn get_user(&self, telegram_id: i64) -> Result<Option<User>>;
    async fn get_user_by_token(&self, token: &str) -> Result<Option<User>>;
    /// Returns `false` when the token is already held by someone else
    async fn set_link_token(
        &self,
        telegram_id: i64,
        token: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn clear_link_token(&self, telegram_id: i64) -> Result<()>;
    async fn is_admin(&self, telegram_id: i64) -> Result<bool>;
    async fn grant_admin(&self, telegram_id: i64) -> Result<()>;
}

#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn get_existing_rating(&self, rater: i64, rated: i64) -> Result<Option<Rating>>;
    /// Returns `false` when the (rater, rated) pair already has a rating
    async fn save_rating(
        &self,
        rater: i64,
        rated: i64,
        score: i16,
        created_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn get_ratings_for_user(&self, rated: i64) -> Result<Vec<Rating>>;
    async fn get_statistics(&self, rated: i64, since: DateTime<Utc>) -> Result<Statistics>;
    async fn get_voters(&self, rated: i64) -> Result<Vec<Voter>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn save_payment(&self, payment: &NewPayment) -> Result<SavePaymentOutcome>;
    async fn get_last_payment(&self, user_id: i64) -> Result<Option<Payment>>;
    /// The pending payment of the user
    async fn get_active_payment(&self, user_id: i64) -> Result<Option<Payment>>;
    async fn delete_active_payment(&self, user_id: i64) -> Result<u64>;
    /// Returns `false` unless the payment existed and was pending
    async fn mark_payment_success(&self, payment_id: i64) -> Result<bool>;
    async fn get_access_payments(&self, user_id: i64, now: DateTime<Utc>)
        -> Result<Vec<Payment>>;
    async fn delete_expired_payments(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64>;
    async fn admin_overview(&self) -> Result<AdminOverview>;
}

#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn get_subscription_price(&self, plan: Plan) -> Result<Option<Decimal>>;
    async fn list_subscription_prices(&self) -> Result<Vec<SubscriptionPrice>>;
    async fn update_subscription_price(&self, plan: Plan, price: Decimal) -> Result<()>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Returns `None` when the same question text already exists
    async fn add_question(&self, text: &str) -> Result<Option<Question>>;
    async fn question_exists(&self, text: &str) -> Result<bool>;
    async fn list_questions(&self) -> Result<Vec<Question>>;
    /// Returns `false` when the token is already taken
    async fn create_question_link(
        &self,
        owner_id: i64,
        token: &str,
        question_ids: &[i64],
        created_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn get_question_link(&self, token: &str) -> Result<Option<QuestionLink>>;
    async fn has_answered_poll(&self, token: &str, rater: i64) -> Result<bool>;
    async fn save_question_answer(
        &self,
        token: &str,
        question_id: i64,
        rater: i64,
        score: i16,
        created_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn get_poll_averages(&self, owner_id: i64) -> Result<Vec<QuestionAverage>>;
    async fn get_poll_breakdown(&self, owner_id: i64) -> Result<Vec<RaterBreakdown>>;
}

/// Everything the bot needs from persistence
pub trait Storage: UserStore + RatingStore + PaymentStore + PriceStore + QuestionStore {}

impl<T> Storage for T where T: UserStore + RatingStore + PaymentStore + PriceStore + QuestionStore {}

/// Postgres-backed storage sharing one connection pool
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgStorage {
    async fn set_user(
        &self,
        telegram_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
    ) -> Result<User> {
        db::set_user(&self.pool, telegram_id, first_name, username).await
    }

    async fn get_user(&self, telegram_id: i64) -> Result<Option<User>> {
        db::get_user(&self.pool, telegram_id).await
    }

    async fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        db::get_user_by_token(&self.pool, token).await
    }

    async fn set_link_token(
        &self,
        telegram_id: i64,
        token: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        db::set_link_token(&self.pool, telegram_id, token, created_at).await
    }

    async fn clear_link_token(&self, telegram_id: i64) -> Result<()> {
        db::clear_link_token(&self.pool, telegram_id).await
    }

    async fn is_admin(&self, telegram_id: i64) -> Result<bool> {
        db::is_admin(&self.pool, telegram_id).await
    }

    async fn grant_admin(&self, telegram_id: i64) -> Result<()> {
        db::grant_admin(&self.pool, telegram_id).await
    }
}

#[async_trait]
impl RatingStore for PgStorage {
    async fn get_existing_rating(&self, rater: i64, rated: i64) -> Result<Option<Rating>> {
        db::get_existing_rating(&self.pool, rater, rated).await
    }

    async fn save_rating(
        &self,
        rater: i64,
        rated: i64,
        score: i16,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        db::save_rating(&self.pool, rater, rated, score, created_at).await
    }

    async fn get_ratings_for_user(&self, rated: i64) -> Result<Vec<Rating>> {
        db::get_ratings_for_user(&self.pool, rated).await
    }

    async fn get_statistics(&self, rated: i64, since: DateTime<Utc>) -> Result<Statistics> {
        db::get_statistics(&self.pool, rated, since).await
    }

    async fn get_voters(&self, rated: i64) -> Result<Vec<Voter>> {
        db::get_voters(&self.pool, rated).await
    }
}

#[async_trait]
impl PaymentStore for PgStorage {
    async fn save_payment(&self, payment: &NewPayment) -> Result<SavePaymentOutcome> {
        db::save_payment(&self.pool, payment).await
    }

    async fn get_last_payment(&self, user_id: i64) -> Result<Option<Payment>> {
        db::get_last_payment(&self.pool, user_id).await
    }

    async fn get_active_payment(&self, user_id: i64) -> Result<Option<Payment>> {
        db::get_active_payment(&self.pool, user_id).await
    }

    async fn delete_active_payment(&self, user_id: i64) -> Result<u64> {
        db::delete_active_payment(&self.pool, user_id).await
    }

    async fn mark_payment_success(&self, payment_id: i64) -> Result<bool> {
        db::mark_payment_success(&self.pool, payment_id).await
    }

    async fn get_access_payments(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        db::get_access_payments(&self.pool, user_id, now).await
    }

    async fn delete_expired_payments(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64> {
        db::delete_expired_payments(&self.pool, now, grace).await
    }

    async fn admin_overview(&self) -> Result<AdminOverview> {
        db::admin_overview(&self.pool).await
    }
}

#[async_trait]
impl PriceStore for PgStorage {
    async fn get_subscription_price(&self, plan: Plan) -> Result<Option<Decimal>> {
        db::get_subscription_price(&self.pool, plan).await
    }

    async fn list_subscription_prices(&self) -> Result<Vec<SubscriptionPrice>> {
        db::list_subscription_prices(&self.pool).await
    }

    async fn update_subscription_price(&self, plan: Plan, price: Decimal) -> Result<()> {
        db::update_subscription_price(&self.pool, plan, price).await
    }
}

#[async_trait]
impl QuestionStore for PgStorage {
    async fn add_question(&self, text: &str) -> Result<Option<Question>> {
        db::add_question(&self.pool, text).await
    }

    async fn question_exists(&self, text: &str) -> Result<bool> {
        db::question_exists(&self.pool, text).await
    }

    async fn list_questions(&self) -> Result<Vec<Question>> {
        db::list_questions(&self.pool).await
    }

    async fn create_question_link(
        &self,
        owner_id: i64,
        token: &str,
        question_ids: &[i64],
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        db::create_question_link(&self.pool, owner_id, token, question_ids, created_at).await
    }

    async fn get_question_link(&self, token: &str) -> Result<Option<QuestionLink>> {
        db::get_question_link(&self.pool, token).await
    }

    async fn has_answered_poll(&self, token: &str, rater: i64) -> Result<bool> {
        db::has_answered_poll(&self.pool, token, rater).await
    }

    async fn save_question_answer(
        &self,
        token: &str,
        question_id: i64,
        rater: i64,
        score: i16,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        db::save_question_answer(&self.pool, token, question_id, rater, score, created_at).await
    }

    async fn get_poll_averages(&self, owner_id: i64) -> Result<Vec<QuestionAverage>> {
        db::get_poll_averages(&self.pool, owner_id).await
    }

    async fn get_poll_breakdown(&self, owner_id: i64) -> Result<Vec<RaterBreakdown>> {
        db::get_poll_breakdown(&self.pool, owner_id).await
    }
}
