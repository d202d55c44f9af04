use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use people_ratings::memory_storage::MemoryStorage;
use people_ratings::models::{NewPayment, Payment, SavePaymentOutcome};
use people_ratings::provider::{Invoice, PaymentProvider, ProviderError};
use people_ratings::reconciliation::{
    CheckOutcome, CountdownView, PaymentError, PaymentRequest, PaymentService,
};
use people_ratings::storage::{PaymentStore, PriceStore, UserStore};
use people_ratings::subscription::{PaymentStatus, Period, Plan};

const USER: i64 = 1001;

/// Provider double with scripted status answers
#[derive(Default)]
struct FakeProvider {
    statuses: Mutex<VecDeque<bool>>,
    fixed_id: Option<String>,
    fail_create: bool,
    created: AtomicUsize,
}

impl FakeProvider {
    fn paying(statuses: &[bool]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create(&self, _amount: Decimal, _description: &str) -> Result<Invoice, ProviderError> {
        if self.fail_create {
            return Err(ProviderError::Http("connection refused".into()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let id = self.fixed_id.clone().unwrap_or_else(|| format!("tx-{n}"));
        Ok(Invoice {
            payment_url: format!("https://pay.example/{id}"),
            external_id: id,
        })
    }

    async fn check_status(&self, _external_id: &str) -> Result<bool, ProviderError> {
        Ok(self.statuses.lock().unwrap().pop_front().unwrap_or(false))
    }
}

/// Countdown view forwarding every tick to the test
struct ChannelView(mpsc::UnboundedSender<u32>);

#[async_trait]
impl CountdownView for ChannelView {
    async fn show_remaining(&self, _payment: &Payment, seconds_left: u32) -> Result<()> {
        self.0.send(seconds_left)?;
        Ok(())
    }
}

struct Silent;

#[async_trait]
impl CountdownView for Silent {
    async fn show_remaining(&self, _payment: &Payment, _seconds_left: u32) -> Result<()> {
        Ok(())
    }
}

async fn setup(provider: FakeProvider) -> Result<(MemoryStorage, PaymentService)> {
    let storage = MemoryStorage::new();
    storage.set_user(USER, Some("Anna"), Some("anna")).await?;
    storage
        .update_subscription_price(Plan::normal(Period::Month), dec!(100))
        .await?;
    storage
        .update_subscription_price(Plan::vip(Period::Month), dec!(250))
        .await?;
    let service = PaymentService::new(
        Arc::new(storage.clone()),
        Arc::new(provider),
        Duration::minutes(10),
        3,
    );
    Ok((storage, service))
}

#[tokio::test]
async fn test_month_payment_is_pending_for_thirty_days() -> Result<()> {
    let (storage, service) = setup(FakeProvider::default()).await?;

    let PaymentRequest::Created(payment) = service
        .request_payment(USER, Plan::normal(Period::Month))
        .await?
    else {
        panic!("expected a new payment");
    };

    assert_eq!(payment.amount, dec!(100));
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.access_end - payment.access_start, Duration::days(30));
    assert_eq!(storage.payments().await, vec![payment]);
    Ok(())
}

#[tokio::test]
async fn test_second_payment_requires_confirmation() -> Result<()> {
    let (storage, service) = setup(FakeProvider::default()).await?;

    let first = match service.request_payment(USER, Plan::normal(Period::Month)).await? {
        PaymentRequest::Created(payment) => payment,
        other => panic!("unexpected {other:?}"),
    };

    let request = service.request_payment(USER, Plan::vip(Period::Month)).await?;
    assert_eq!(
        request,
        PaymentRequest::NeedsConfirmation {
            existing: first.clone(),
            plan: Plan::vip(Period::Month),
        }
    );
    // Nothing is removed until the user confirms
    assert_eq!(storage.payments().await, vec![first.clone()]);

    let second = service.replace_pending(USER, Plan::vip(Period::Month)).await?;
    assert_ne!(second.id, first.id);
    assert!(second.is_vip);
    assert_eq!(storage.payments().await, vec![second]);
    Ok(())
}

#[tokio::test]
async fn test_stale_pending_payment_is_replaced_without_asking() -> Result<()> {
    let (storage, service) = setup(FakeProvider::default()).await?;
    let old = Utc::now() - Duration::minutes(30);
    storage
        .save_payment(&NewPayment {
            user_id: USER,
            amount: dec!(100),
            transaction_id: "old-tx".into(),
            payment_url: "https://pay.example/old".into(),
            plan: Plan::normal(Period::Month),
            access_start: old,
            access_end: old + Duration::days(30),
            created_at: old,
        })
        .await?;

    let request = service.request_payment(USER, Plan::normal(Period::Month)).await?;
    assert!(matches!(request, PaymentRequest::Created(_)));
    let payments = storage.payments().await;
    assert_eq!(payments.len(), 1);
    assert_ne!(payments[0].transaction_id, "old-tx");
    Ok(())
}

#[tokio::test]
async fn test_missing_price_rejects_payment() -> Result<()> {
    let (storage, service) = setup(FakeProvider::default()).await?;

    let err = service
        .request_payment(USER, Plan::normal(Period::Week))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PriceNotSet(plan) if plan == Plan::normal(Period::Week)));
    assert!(storage.payments().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_provider_failure_surfaces() -> Result<()> {
    let provider = FakeProvider {
        fail_create: true,
        ..Default::default()
    };
    let (storage, service) = setup(provider).await?;

    let err = service.initiate(USER, Plan::normal(Period::Month)).await.unwrap_err();
    assert!(matches!(err, PaymentError::Provider(ProviderError::Http(_))));
    assert!(storage.payments().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_repeated_transaction_ids_give_up() -> Result<()> {
    let provider = FakeProvider {
        fixed_id: Some("same".into()),
        ..Default::default()
    };
    let (storage, service) = setup(provider).await?;
    storage.set_user(2002, Some("Boris"), None).await?;

    service.initiate(USER, Plan::normal(Period::Month)).await?;
    let err = service.initiate(2002, Plan::normal(Period::Month)).await.unwrap_err();
    assert!(matches!(err, PaymentError::TransactionIdExhausted));
    Ok(())
}

#[tokio::test]
async fn test_check_without_payments() -> Result<()> {
    let (_storage, service) = setup(FakeProvider::default()).await?;
    assert_eq!(service.check_payment(USER, &Silent).await?, CheckOutcome::NoPayments);
    Ok(())
}

#[tokio::test]
async fn test_paid_payment_is_confirmed_and_stays_paid() -> Result<()> {
    let (storage, service) = setup(FakeProvider::paying(&[true])).await?;
    service.initiate(USER, Plan::vip(Period::Month)).await?;

    let outcome = service.check_payment(USER, &Silent).await?;
    let CheckOutcome::Confirmed(payment) = outcome else {
        panic!("expected confirmation, got {outcome:?}");
    };
    assert_eq!(payment.status, PaymentStatus::Success);
    assert!(service.has_active_access(USER).await?);
    assert!(service.is_vip(USER).await?);

    // Success is terminal: later checks and pending cleanup leave it alone
    assert!(matches!(
        service.check_payment(USER, &Silent).await?,
        CheckOutcome::AlreadyPaid(_)
    ));
    assert_eq!(storage.delete_active_payment(USER).await?, 0);
    assert!(!storage.mark_payment_success(payment.id).await?);
    assert_eq!(storage.payments().await[0].status, PaymentStatus::Success);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_countdown_then_recheck() -> Result<()> {
    let (storage, service) = setup(FakeProvider::paying(&[false, true])).await?;
    service.initiate(USER, Plan::normal(Period::Month)).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = tokio::time::Instant::now();
    let outcome = service.check_payment(USER, &ChannelView(tx)).await?;

    assert!(matches!(outcome, CheckOutcome::Confirmed(_)));
    assert!(started.elapsed() >= std::time::Duration::from_secs(3));
    let mut ticks = Vec::new();
    while let Ok(tick) = rx.try_recv() {
        ticks.push(tick);
    }
    assert_eq!(ticks, vec![3, 2, 1]);
    assert_eq!(storage.payments().await[0].status, PaymentStatus::Success);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unpaid_after_countdown_stays_pending() -> Result<()> {
    let (storage, service) = setup(FakeProvider::paying(&[false, false])).await?;
    service.initiate(USER, Plan::normal(Period::Month)).await?;

    let outcome = service.check_payment(USER, &Silent).await?;
    assert!(matches!(outcome, CheckOutcome::NotPaid(_)));
    assert_eq!(storage.payments().await[0].status, PaymentStatus::Pending);
    assert!(!service.has_active_access(USER).await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_check_reports_in_progress() -> Result<()> {
    let (_storage, service) = setup(FakeProvider::paying(&[false, false])).await?;
    service.initiate(USER, Plan::normal(Period::Month)).await?;
    let service = Arc::new(service);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.check_payment(USER, &ChannelView(tx)).await })
    };

    // First tick means the first check holds the lock
    assert_eq!(rx.recv().await, Some(3));
    assert_eq!(service.check_payment(USER, &Silent).await?, CheckOutcome::InProgress);

    assert!(matches!(running.await??, CheckOutcome::NotPaid(_)));
    // Lock released on exit
    assert!(matches!(
        service.check_payment(USER, &Silent).await?,
        CheckOutcome::NotPaid(_)
    ));
    Ok(())
}

#[tokio::test]
async fn test_expired_pending_payment() -> Result<()> {
    let (storage, service) = setup(FakeProvider::paying(&[true])).await?;
    let old = Utc::now() - Duration::minutes(11);
    let outcome = storage
        .save_payment(&NewPayment {
            user_id: USER,
            amount: dec!(100),
            transaction_id: "late".into(),
            payment_url: "https://pay.example/late".into(),
            plan: Plan::normal(Period::Day),
            access_start: old,
            access_end: old + Duration::days(1),
            created_at: old,
        })
        .await?;
    assert!(matches!(outcome, SavePaymentOutcome::Saved(_)));

    assert_eq!(service.check_payment(USER, &Silent).await?, CheckOutcome::Expired);
    // Expiry is reported, not acted upon; the sweep removes the row
    assert_eq!(storage.payments().await[0].status, PaymentStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_access_window_breakdown() -> Result<()> {
    let (_storage, service) = setup(FakeProvider::paying(&[true])).await?;
    assert!(service.access(USER).await?.is_none());

    service.initiate(USER, Plan::normal(Period::Month)).await?;
    service.check_payment(USER, &Silent).await?;

    let access = service.access(USER).await?.expect("access after payment");
    assert!(!access.vip);
    let (days, _, _) = access.remaining(Utc::now());
    assert!(days == 29 || days == 30);
    Ok(())
}
