//! Domain records shared by the storage backends and the services.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::subscription::{PaymentStatus, Period, Plan};

/// A Telegram user known to the bot
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub link_token: Option<String>,
    pub link_created_at: Option<DateTime<Utc>>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Name shown to people rating this user
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.username.as_ref().map(|u| format!("@{u}")))
            .unwrap_or_else(|| self.telegram_id.to_string())
    }
}

/// A single 1–5 score given by one user to another
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Rating {
    pub id: i64,
    pub rater_user_id: i64,
    pub rated_user_id: i64,
    pub score: i16,
    pub created_at: DateTime<Utc>,
}

/// Aggregate score over a look-back window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Statistics {
    pub average: Option<f64>,
    pub total: i64,
}

/// A rater as shown to VIP subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Voter {
    pub rater_id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub score: i16,
    pub created_at: DateTime<Utc>,
}

impl Voter {
    pub fn label(&self) -> String {
        match (&self.username, &self.first_name) {
            (Some(username), _) => format!("@{username}"),
            (None, Some(name)) => name.clone(),
            (None, None) => self.rater_id.to_string(),
        }
    }
}

/// Payment row as it is about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub user_id: i64,
    pub amount: Decimal,
    pub transaction_id: String,
    pub payment_url: String,
    pub plan: Plan,
    pub access_start: DateTime<Utc>,
    pub access_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Stored payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    pub transaction_id: String,
    pub payment_url: String,
    pub status: PaymentStatus,
    pub period: Period,
    pub is_vip: bool,
    pub access_start: DateTime<Utc>,
    pub access_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn plan(&self) -> Plan {
        Plan {
            period: self.period,
            is_vip: self.is_vip,
        }
    }

    /// A payment is expired once it stayed unpaid past the grace window or
    /// its access window has elapsed. Expired rows are what the sweep removes.
    pub fn is_expired(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        let unpaid_too_long =
            self.status == PaymentStatus::Pending && self.created_at + grace < now;
        unpaid_too_long || self.access_end <= now
    }

    /// Whether this payment currently unlocks statistics
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Success && self.access_end > now
    }
}

/// Result of inserting a payment row
#[derive(Debug, Clone, PartialEq)]
pub enum SavePaymentOutcome {
    Saved(Payment),
    /// The external transaction id is already stored
    DuplicateTransaction,
    /// The user already has a pending payment
    PendingExists,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPrice {
    pub plan: Plan,
    pub price: Decimal,
}

/// Counters for the admin overview screen
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdminOverview {
    pub total_users: i64,
    pub users_with_links: i64,
    pub normal_payments: i64,
    pub vip_payments: i64,
    pub total_normal: Decimal,
    pub total_vip: Decimal,
}

impl AdminOverview {
    pub fn total_spent(&self) -> Decimal {
        self.total_normal + self.total_vip
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Question {
    pub id: i64,
    pub text: String,
}

/// A poll link owned by a user, with its questions in presentation order
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionLink {
    pub token: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
    pub questions: Vec<Question>,
}

/// Average answer to one question across all of an owner's polls
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionAverage {
    pub question_id: i64,
    pub text: String,
    pub average: f64,
    pub answers: i64,
}

/// Per-rater answers, shown to VIP owners
#[derive(Debug, Clone, PartialEq)]
pub struct RaterBreakdown {
    pub rater_id: i64,
    pub username: Option<String>,
    pub answers: Vec<QuestionAverage>,
}
