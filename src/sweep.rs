//! Background removal of expired payments.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::storage::PaymentStore;

/// One pass: delete pending payments past the grace window and any payment
/// whose access window has elapsed. Returns how many rows went away.
pub async fn sweep_once<S>(storage: &S, grace: Duration) -> Result<u64>
where
    S: PaymentStore + ?Sized,
{
    let removed = storage.delete_expired_payments(Utc::now(), grace).await?;
    if removed > 0 {
        info!(removed, "Removed expired payments");
    }
    Ok(removed)
}

/// Run [`sweep_once`] every `interval` until `shutdown` flips to `true`.
///
/// A failing pass is logged and the loop carries on.
pub async fn run_sweep_loop<S>(
    storage: Arc<S>,
    interval: std::time::Duration,
    grace: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: PaymentStore + ?Sized,
{
    info!(interval_secs = interval.as_secs(), "Payment sweep started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = sweep_once(storage.as_ref(), grace).await {
            error!(error = %e, "Payment sweep pass failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Sender dropped, nobody can ask us to keep going
                    break;
                }
            }
        }
    }
    info!("Payment sweep stopped");
}
