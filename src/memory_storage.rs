//! In-process storage mirroring the Postgres constraints.
//!
//! Used by the test suites and handy for running the services without a
//! database. Uniqueness rules (one rating per pair, one pending payment per
//! user, unique transaction ids and tokens) are enforced the same way the
//! schema enforces them.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{
    AdminOverview, NewPayment, Payment, Question, QuestionAverage, QuestionLink, RaterBreakdown,
    Rating, SavePaymentOutcome, Statistics, SubscriptionPrice, User, Voter,
};
use crate::storage::{PaymentStore, PriceStore, QuestionStore, RatingStore, UserStore};
use crate::subscription::{PaymentStatus, Period, Plan};

#[derive(Debug, Clone)]
struct StoredLink {
    owner_id: i64,
    created_at: DateTime<Utc>,
    question_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
struct StoredAnswer {
    token: String,
    question_id: i64,
    rater: i64,
    score: i16,
}

#[derive(Default)]
struct State {
    users: HashMap<i64, User>,
    ratings: Vec<Rating>,
    payments: Vec<Payment>,
    prices: HashMap<Plan, Decimal>,
    questions: Vec<Question>,
    links: HashMap<String, StoredLink>,
    answers: Vec<StoredAnswer>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_user(&self, telegram_id: i64) -> Result<()> {
        if !self.users.contains_key(&telegram_id) {
            bail!("User {telegram_id} not found");
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored payment, oldest first
    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }

    pub async fn ratings(&self) -> Vec<Rating> {
        self.state.lock().await.ratings.clone()
    }
}

fn average(scores: impl Iterator<Item = i16>) -> (Option<f64>, i64) {
    let (sum, count) = scores.fold((0i64, 0i64), |(sum, count), s| (sum + s as i64, count + 1));
    if count == 0 {
        (None, 0)
    } else {
        (Some(sum as f64 / count as f64), count)
    }
}

#[async_trait]
impl UserStore for MemoryStorage {
    async fn set_user(
        &self,
        telegram_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
    ) -> Result<User> {
        let mut state = self.state.lock().await;
        let user = state.users.entry(telegram_id).or_insert_with(|| User {
            telegram_id,
            first_name: None,
            username: None,
            link_token: None,
            link_created_at: None,
            is_admin: false,
            created_at: Utc::now(),
        });
        user.first_name = first_name.map(str::to_string);
        user.username = username.map(str::to_string);
        Ok(user.clone())
    }

    async fn get_user(&self, telegram_id: i64) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&telegram_id).cloned())
    }

    async fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.link_token.as_deref() == Some(token))
            .cloned())
    }

    async fn set_link_token(
        &self,
        telegram_id: i64,
        token: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.require_user(telegram_id)?;
        let taken = state
            .users
            .values()
            .any(|u| u.telegram_id != telegram_id && u.link_token.as_deref() == Some(token));
        if taken {
            return Ok(false);
        }
        if let Some(user) = state.users.get_mut(&telegram_id) {
            user.link_token = Some(token.to_string());
            user.link_created_at = Some(created_at);
        }
        Ok(true)
    }

    async fn clear_link_token(&self, telegram_id: i64) -> Result<()> {
        if let Some(user) = self.state.lock().await.users.get_mut(&telegram_id) {
            user.link_token = None;
            user.link_created_at = None;
        }
        Ok(())
    }

    async fn is_admin(&self, telegram_id: i64) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.users.get(&telegram_id).is_some_and(|u| u.is_admin))
    }

    async fn grant_admin(&self, telegram_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = state.users.entry(telegram_id).or_insert_with(|| User {
            telegram_id,
            first_name: None,
            username: None,
            link_token: None,
            link_created_at: None,
            is_admin: false,
            created_at: Utc::now(),
        });
        user.is_admin = true;
        Ok(())
    }
}

#[async_trait]
impl RatingStore for MemoryStorage {
    async fn get_existing_rating(&self, rater: i64, rated: i64) -> Result<Option<Rating>> {
        let state = self.state.lock().await;
        Ok(state
            .ratings
            .iter()
            .find(|r| r.rater_user_id == rater && r.rated_user_id == rated)
            .cloned())
    }

    async fn save_rating(
        &self,
        rater: i64,
        rated: i64,
        score: i16,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.require_user(rater)?;
        state.require_user(rated)?;
        if rater == rated {
            bail!("Self-rating violates ratings_no_self_rating");
        }
        if !(1..=5).contains(&score) {
            bail!("Score {score} out of range");
        }
        if state
            .ratings
            .iter()
            .any(|r| r.rater_user_id == rater && r.rated_user_id == rated)
        {
            return Ok(false);
        }
        let id = state.next_id();
        state.ratings.push(Rating {
            id,
            rater_user_id: rater,
            rated_user_id: rated,
            score,
            created_at,
        });
        Ok(true)
    }

    async fn get_ratings_for_user(&self, rated: i64) -> Result<Vec<Rating>> {
        let state = self.state.lock().await;
        Ok(state
            .ratings
            .iter()
            .filter(|r| r.rated_user_id == rated)
            .cloned()
            .collect())
    }

    async fn get_statistics(&self, rated: i64, since: DateTime<Utc>) -> Result<Statistics> {
        let state = self.state.lock().await;
        let (average, total) = average(
            state
                .ratings
                .iter()
                .filter(|r| r.rated_user_id == rated && r.created_at >= since)
                .map(|r| r.score),
        );
        Ok(Statistics { average, total })
    }

    async fn get_voters(&self, rated: i64) -> Result<Vec<Voter>> {
        let state = self.state.lock().await;
        let mut voters: Vec<Voter> = state
            .ratings
            .iter()
            .filter(|r| r.rated_user_id == rated)
            .map(|r| {
                let rater = state.users.get(&r.rater_user_id);
                Voter {
                    rater_id: r.rater_user_id,
                    first_name: rater.and_then(|u| u.first_name.clone()),
                    username: rater.and_then(|u| u.username.clone()),
                    score: r.score,
                    created_at: r.created_at,
                }
            })
            .collect();
        voters.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(voters)
    }
}

#[async_trait]
impl PaymentStore for MemoryStorage {
    async fn save_payment(&self, payment: &NewPayment) -> Result<SavePaymentOutcome> {
        let mut state = self.state.lock().await;
        state.require_user(payment.user_id)?;
        if state
            .payments
            .iter()
            .any(|p| p.transaction_id == payment.transaction_id)
        {
            return Ok(SavePaymentOutcome::DuplicateTransaction);
        }
        if state
            .payments
            .iter()
            .any(|p| p.user_id == payment.user_id && p.status == PaymentStatus::Pending)
        {
            return Ok(SavePaymentOutcome::PendingExists);
        }
        let stored = Payment {
            id: state.next_id(),
            user_id: payment.user_id,
            amount: payment.amount,
            transaction_id: payment.transaction_id.clone(),
            payment_url: payment.payment_url.clone(),
            status: PaymentStatus::Pending,
            period: payment.plan.period,
            is_vip: payment.plan.is_vip,
            access_start: payment.access_start,
            access_end: payment.access_end,
            created_at: payment.created_at,
        };
        state.payments.push(stored.clone());
        Ok(SavePaymentOutcome::Saved(stored))
    }

    async fn get_last_payment(&self, user_id: i64) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .max_by_key(|p| (p.created_at, p.id))
            .cloned())
    }

    async fn get_active_payment(&self, user_id: i64) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id && p.status == PaymentStatus::Pending)
            .max_by_key(|p| p.id)
            .cloned())
    }

    async fn delete_active_payment(&self, user_id: i64) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.payments.len();
        state
            .payments
            .retain(|p| !(p.user_id == user_id && p.status == PaymentStatus::Pending));
        Ok((before - state.payments.len()) as u64)
    }

    async fn mark_payment_success(&self, payment_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id && p.status == PaymentStatus::Pending)
        {
            Some(payment) => {
                payment.status = PaymentStatus::Success;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_access_payments(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut paid: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id && p.grants_access(now))
            .cloned()
            .collect();
        paid.sort_by(|a, b| b.access_end.cmp(&a.access_end));
        Ok(paid)
    }

    async fn delete_expired_payments(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.payments.len();
        state.payments.retain(|p| !p.is_expired(now, grace));
        Ok((before - state.payments.len()) as u64)
    }

    async fn admin_overview(&self) -> Result<AdminOverview> {
        let state = self.state.lock().await;
        let mut overview = AdminOverview {
            total_users: state.users.len() as i64,
            users_with_links: state.users.values().filter(|u| u.link_token.is_some()).count()
                as i64,
            ..Default::default()
        };
        for payment in state
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Success)
        {
            if payment.is_vip {
                overview.vip_payments += 1;
                overview.total_vip += payment.amount;
            } else {
                overview.normal_payments += 1;
                overview.total_normal += payment.amount;
            }
        }
        Ok(overview)
    }
}

#[async_trait]
impl PriceStore for MemoryStorage {
    async fn get_subscription_price(&self, plan: Plan) -> Result<Option<Decimal>> {
        Ok(self.state.lock().await.prices.get(&plan).copied())
    }

    async fn list_subscription_prices(&self) -> Result<Vec<SubscriptionPrice>> {
        let state = self.state.lock().await;
        let mut prices: Vec<SubscriptionPrice> = state
            .prices
            .iter()
            .map(|(plan, price)| SubscriptionPrice {
                plan: *plan,
                price: *price,
            })
            .collect();
        prices.sort_by_key(|p| (p.plan.is_vip, Period::ALL.iter().position(|x| *x == p.plan.period)));
        Ok(prices)
    }

    async fn update_subscription_price(&self, plan: Plan, price: Decimal) -> Result<()> {
        if price <= Decimal::ZERO {
            bail!("Price must be positive");
        }
        self.state.lock().await.prices.insert(plan, price);
        Ok(())
    }
}

#[async_trait]
impl QuestionStore for MemoryStorage {
    async fn add_question(&self, text: &str) -> Result<Option<Question>> {
        let mut state = self.state.lock().await;
        if state.questions.iter().any(|q| q.text == text) {
            return Ok(None);
        }
        let question = Question {
            id: state.next_id(),
            text: text.to_string(),
        };
        state.questions.push(question.clone());
        Ok(Some(question))
    }

    async fn question_exists(&self, text: &str) -> Result<bool> {
        Ok(self.state.lock().await.questions.iter().any(|q| q.text == text))
    }

    async fn list_questions(&self) -> Result<Vec<Question>> {
        Ok(self.state.lock().await.questions.clone())
    }

    async fn create_question_link(
        &self,
        owner_id: i64,
        token: &str,
        question_ids: &[i64],
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.require_user(owner_id)?;
        if state.links.contains_key(token) {
            return Ok(false);
        }
        for id in question_ids {
            if !state.questions.iter().any(|q| q.id == *id) {
                bail!("Question {id} not found");
            }
        }
        state.links.insert(
            token.to_string(),
            StoredLink {
                owner_id,
                created_at,
                question_ids: question_ids.to_vec(),
            },
        );
        Ok(true)
    }

    async fn get_question_link(&self, token: &str) -> Result<Option<QuestionLink>> {
        let state = self.state.lock().await;
        Ok(state.links.get(token).map(|link| QuestionLink {
            token: token.to_string(),
            owner_id: link.owner_id,
            created_at: link.created_at,
            questions: link
                .question_ids
                .iter()
                .filter_map(|id| state.questions.iter().find(|q| q.id == *id).cloned())
                .collect(),
        }))
    }

    async fn has_answered_poll(&self, token: &str, rater: i64) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .answers
            .iter()
            .any(|a| a.token == token && a.rater == rater))
    }

    async fn save_question_answer(
        &self,
        token: &str,
        question_id: i64,
        rater: i64,
        score: i16,
        _created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.require_user(rater)?;
        if !state.links.contains_key(token) {
            bail!("Question link {token} not found");
        }
        if state
            .answers
            .iter()
            .any(|a| a.token == token && a.question_id == question_id && a.rater == rater)
        {
            return Ok(false);
        }
        state.answers.push(StoredAnswer {
            token: token.to_string(),
            question_id,
            rater,
            score,
        });
        Ok(true)
    }

    async fn get_poll_averages(&self, owner_id: i64) -> Result<Vec<QuestionAverage>> {
        let state = self.state.lock().await;
        let owned = |a: &&StoredAnswer| {
            state
                .links
                .get(&a.token)
                .is_some_and(|l| l.owner_id == owner_id)
        };
        let mut results = Vec::new();
        for question in &state.questions {
            let (avg, answers) = average(
                state
                    .answers
                    .iter()
                    .filter(owned)
                    .filter(|a| a.question_id == question.id)
                    .map(|a| a.score),
            );
            if let Some(avg) = avg {
                results.push(QuestionAverage {
                    question_id: question.id,
                    text: question.text.clone(),
                    average: avg,
                    answers,
                });
            }
        }
        Ok(results)
    }

    async fn get_poll_breakdown(&self, owner_id: i64) -> Result<Vec<RaterBreakdown>> {
        let state = self.state.lock().await;
        let mut raters: Vec<i64> = state
            .answers
            .iter()
            .filter(|a| {
                state
                    .links
                    .get(&a.token)
                    .is_some_and(|l| l.owner_id == owner_id)
            })
            .map(|a| a.rater)
            .collect();
        raters.sort_unstable();
        raters.dedup();

        let mut breakdown = Vec::new();
        for rater in raters {
            let mut answers = Vec::new();
            for question in &state.questions {
                let (avg, count) = average(
                    state
                        .answers
                        .iter()
                        .filter(|a| {
                            a.rater == rater
                                && a.question_id == question.id
                                && state
                                    .links
                                    .get(&a.token)
                                    .is_some_and(|l| l.owner_id == owner_id)
                        })
                        .map(|a| a.score),
                );
                if let Some(avg) = avg {
                    answers.push(QuestionAverage {
                        question_id: question.id,
                        text: question.text.clone(),
                        average: avg,
                        answers: count,
                    });
                }
            }
            breakdown.push(RaterBreakdown {
                rater_id: rater,
                username: state.users.get(&rater).and_then(|u| u.username.clone()),
                answers,
            });
        }
        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rating_pair_is_unique() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.set_user(1, Some("A"), None).await?;
        storage.set_user(2, Some("B"), None).await?;

        assert!(storage.save_rating(1, 2, 5, Utc::now()).await?);
        assert!(!storage.save_rating(1, 2, 3, Utc::now()).await?);
        assert_eq!(storage.ratings().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_self_rating_rejected_by_storage() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.set_user(1, Some("A"), None).await?;
        assert!(storage.save_rating(1, 1, 5, Utc::now()).await.is_err());
        assert!(storage.ratings().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_token_collision_reported() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.set_user(1, None, None).await?;
        storage.set_user(2, None, None).await?;
        assert!(storage.set_link_token(1, "tok", Utc::now()).await?);
        assert!(!storage.set_link_token(2, "tok", Utc::now()).await?);
        // Re-storing your own token is not a collision
        assert!(storage.set_link_token(1, "tok", Utc::now()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_success_is_terminal() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.set_user(1, None, None).await?;
        let now = Utc::now();
        let plan = Plan::normal(Period::Week);
        let new = NewPayment {
            user_id: 1,
            amount: Decimal::new(5000, 2),
            transaction_id: "tx".to_string(),
            payment_url: "https://pay.example/tx".to_string(),
            plan,
            access_start: now,
            access_end: now + plan.period.duration(),
            created_at: now,
        };
        let SavePaymentOutcome::Saved(payment) = storage.save_payment(&new).await? else {
            bail!("payment not saved");
        };

        assert!(storage.mark_payment_success(payment.id).await?);
        assert!(!storage.mark_payment_success(payment.id).await?);
        // A paid row never goes back to pending and is not the active payment
        assert_eq!(storage.get_active_payment(1).await?, None);
        assert_eq!(storage.delete_active_payment(1).await?, 0);
        let stored = storage.payments().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, PaymentStatus::Success);
        assert!(!storage.mark_payment_success(payment.id + 1).await?);
        Ok(())
    }
}
