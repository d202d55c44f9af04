//! # Payment Reconciliation
//!
//! Drives a payment through its lifecycle: creating an invoice for a plan,
//! interactive status checks with a visible countdown, and access lookups.
//!
//! A payment is `pending` until the provider confirms it, then `success`
//! until its access window elapses and the sweep deletes it. Nothing ever
//! moves a payment back to `pending`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::models::{NewPayment, Payment, SavePaymentOutcome};
use crate::provider::{PaymentProvider, ProviderError};
use crate::storage::Storage;
use crate::subscription::{PaymentStatus, Plan};

/// How many times a colliding transaction id is regenerated before giving up
const MAX_CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("no price configured for {} ({})", .0.period, .0.tier_tag())]
    PriceNotSet(Plan),
    #[error("payment provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("user already has a pending payment")]
    PendingExists,
    #[error("could not obtain a unique transaction id")]
    TransactionIdExhausted,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Result of asking to pay for a plan
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentRequest {
    /// A pending payment already exists and must be replaced explicitly
    NeedsConfirmation { existing: Payment, plan: Plan },
    Created(Payment),
}

/// Result of an interactive status check
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    NoPayments,
    Expired,
    AlreadyPaid(Payment),
    Confirmed(Payment),
    /// Still unpaid after the countdown re-check
    NotPaid(Payment),
    /// Another check for the same user is running
    InProgress,
}

/// Currently unlocked access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub until: DateTime<Utc>,
    pub vip: bool,
}

impl Access {
    /// Remaining (days, hours, minutes), clamped at zero
    pub fn remaining(&self, now: DateTime<Utc>) -> (i64, i64, i64) {
        let left = (self.until - now).max(Duration::zero());
        let minutes = left.num_minutes();
        (minutes / (24 * 60), (minutes / 60) % 24, minutes % 60)
    }
}

/// Renders the countdown between the two provider checks
#[async_trait]
pub trait CountdownView: Send + Sync {
    async fn show_remaining(&self, payment: &Payment, seconds_left: u32) -> anyhow::Result<()>;
}

/// Per-user locks so one user cannot run two checks at once while other
/// users proceed independently.
#[derive(Debug, Default, Clone)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the user's lock, or `None` if it is already held
    pub async fn try_acquire(&self, user_id: i64) -> Option<OwnedMutexGuard<()>> {
        let mut locks = self.inner.lock().await;
        locks.retain(|id, lock| *id == user_id || Arc::strong_count(lock) > 1);
        let lock = locks.entry(user_id).or_default().clone();
        lock.try_lock_owned().ok()
    }
}

pub struct PaymentService {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn PaymentProvider>,
    grace: Duration,
    countdown_secs: u32,
    locks: UserLocks,
}

impl PaymentService {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn PaymentProvider>,
        grace: Duration,
        countdown_secs: u32,
    ) -> Self {
        Self {
            storage,
            provider,
            grace,
            countdown_secs,
            locks: UserLocks::new(),
        }
    }

    /// Start paying for `plan`, unless a live pending payment needs to be
    /// replaced first. A stale pending payment is dropped silently.
    pub async fn request_payment(&self, user_id: i64, plan: Plan) -> Result<PaymentRequest, PaymentError> {
        if let Some(existing) = self.storage.get_active_payment(user_id).await? {
            if existing.is_expired(Utc::now(), self.grace) {
                debug!(user_id = %user_id, payment_id = existing.id, "Dropping stale pending payment");
                self.storage.delete_active_payment(user_id).await?;
            } else {
                return Ok(PaymentRequest::NeedsConfirmation { existing, plan });
            }
        }
        self.initiate(user_id, plan).await.map(PaymentRequest::Created)
    }

    /// Remove the pending payment and create a new one for `plan`
    pub async fn replace_pending(&self, user_id: i64, plan: Plan) -> Result<Payment, PaymentError> {
        let removed = self.storage.delete_active_payment(user_id).await?;
        info!(user_id = %user_id, removed, "Replacing pending payment");
        self.initiate(user_id, plan).await
    }

    /// Create an invoice and store it as a new pending payment
    pub async fn initiate(&self, user_id: i64, plan: Plan) -> Result<Payment, PaymentError> {
        let price = self
            .storage
            .get_subscription_price(plan)
            .await?
            .ok_or(PaymentError::PriceNotSet(plan))?;

        let description = format!("Access to statistics for one {}", plan.period);

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let invoice = self.provider.create(price, &description).await?;
            let now = Utc::now();
            let new_payment = NewPayment {
                user_id,
                amount: price,
                transaction_id: invoice.external_id,
                payment_url: invoice.payment_url,
                plan,
                access_start: now,
                access_end: now + plan.period.duration(),
                created_at: now,
            };

            match self.storage.save_payment(&new_payment).await? {
                SavePaymentOutcome::Saved(payment) => {
                    info!(
                        user_id = %user_id,
                        payment_id = payment.id,
                        period = %plan.period,
                        vip = plan.is_vip,
                        amount = %price,
                        "Created pending payment"
                    );
                    return Ok(payment);
                }
                SavePaymentOutcome::DuplicateTransaction => {
                    warn!(user_id = %user_id, attempt, "Transaction id collision, retrying");
                }
                SavePaymentOutcome::PendingExists => return Err(PaymentError::PendingExists),
            }
        }
        Err(PaymentError::TransactionIdExhausted)
    }

    /// Check the user's most recent payment, counting down once before a
    /// second provider check when it is still unpaid.
    pub async fn check_payment(
        &self,
        user_id: i64,
        view: &dyn CountdownView,
    ) -> Result<CheckOutcome, PaymentError> {
        let Some(_guard) = self.locks.try_acquire(user_id).await else {
            debug!(user_id = %user_id, "Payment check already running");
            return Ok(CheckOutcome::InProgress);
        };

        let Some(payment) = self.storage.get_last_payment(user_id).await? else {
            return Ok(CheckOutcome::NoPayments);
        };

        if payment.is_expired(Utc::now(), self.grace) {
            return Ok(CheckOutcome::Expired);
        }
        if payment.status == PaymentStatus::Success {
            return Ok(CheckOutcome::AlreadyPaid(payment));
        }

        if self.provider.check_status(&payment.transaction_id).await? {
            return self.confirm(payment).await;
        }

        for seconds_left in (1..=self.countdown_secs).rev() {
            if let Err(e) = view.show_remaining(&payment, seconds_left).await {
                debug!(user_id = %user_id, error = %e, "Failed to render countdown");
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }

        if self.provider.check_status(&payment.transaction_id).await? {
            return self.confirm(payment).await;
        }

        debug!(user_id = %user_id, payment_id = payment.id, "Payment still pending");
        Ok(CheckOutcome::NotPaid(payment))
    }

    async fn confirm(&self, mut payment: Payment) -> Result<CheckOutcome, PaymentError> {
        if self.storage.mark_payment_success(payment.id).await? {
            info!(user_id = %payment.user_id, payment_id = payment.id, "Payment confirmed");
            payment.status = PaymentStatus::Success;
            return Ok(CheckOutcome::Confirmed(payment));
        }

        // The row changed underneath us: either another path confirmed it or
        // the sweep removed it.
        match self.storage.get_last_payment(payment.user_id).await? {
            Some(current) if current.id == payment.id && current.status == PaymentStatus::Success => {
                Ok(CheckOutcome::Confirmed(current))
            }
            _ => {
                warn!(user_id = %payment.user_id, payment_id = payment.id, "Paid payment no longer stored");
                Ok(CheckOutcome::Expired)
            }
        }
    }

    /// Access currently unlocked by successful payments
    pub async fn access(&self, user_id: i64) -> anyhow::Result<Option<Access>> {
        let paid = self.storage.get_access_payments(user_id, Utc::now()).await?;
        let until = paid.iter().map(|p| p.access_end).max();
        Ok(until.map(|until| Access {
            until,
            vip: paid.iter().any(|p| p.is_vip),
        }))
    }

    pub async fn has_active_access(&self, user_id: i64) -> anyhow::Result<bool> {
        Ok(self.access(user_id).await?.is_some())
    }

    pub async fn is_vip(&self, user_id: i64) -> anyhow::Result<bool> {
        Ok(self.access(user_id).await?.is_some_and(|a| a.vip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_remaining_breakdown() {
        let now = Utc::now();
        let access = Access {
            until: now + Duration::days(2) + Duration::hours(3) + Duration::minutes(4),
            vip: false,
        };
        assert_eq!(access.remaining(now), (2, 3, 4));
        assert_eq!(access.remaining(now + Duration::days(5)), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_user_locks_are_per_user() {
        let locks = UserLocks::new();
        let first = locks.try_acquire(1).await;
        assert!(first.is_some());
        assert!(locks.try_acquire(1).await.is_none());
        assert!(locks.try_acquire(2).await.is_some());

        drop(first);
        assert!(locks.try_acquire(1).await.is_some());
    }
}
