//! Admin-only operations. Every mutation checks the role first and does
//! nothing for non-admins.

use anyhow::Result;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{AdminOverview, SubscriptionPrice};
use crate::storage::Storage;
use crate::subscription::Plan;

/// Largest amount a `NUMERIC(10,2)` column holds
const MAX_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Result of an admin action
#[derive(Debug, Clone, PartialEq)]
pub enum AdminOutcome<T> {
    Done(T),
    Forbidden,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PriceUpdate {
    Updated(Decimal),
    InvalidInput,
}

/// Parse a price typed by an admin: positive, at most two decimals.
/// A decimal comma is accepted.
pub fn parse_price(input: &str) -> Option<Decimal> {
    let normalized = input.trim().replace(',', ".");
    let price = Decimal::from_str(&normalized).ok()?;
    if price <= Decimal::ZERO || price.scale() > 2 || price > MAX_PRICE {
        return None;
    }
    Some(price)
}

pub struct AdminService {
    storage: Arc<dyn Storage>,
}

impl AdminService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn is_admin(&self, user_id: i64) -> Result<bool> {
        self.storage.is_admin(user_id).await
    }

    pub async fn overview(&self, user_id: i64) -> Result<AdminOutcome<AdminOverview>> {
        if !self.is_admin(user_id).await? {
            return Ok(AdminOutcome::Forbidden);
        }
        Ok(AdminOutcome::Done(self.storage.admin_overview().await?))
    }

    pub async fn prices(&self, user_id: i64) -> Result<AdminOutcome<Vec<SubscriptionPrice>>> {
        if !self.is_admin(user_id).await? {
            return Ok(AdminOutcome::Forbidden);
        }
        Ok(AdminOutcome::Done(self.storage.list_subscription_prices().await?))
    }

    pub async fn set_price(
        &self,
        user_id: i64,
        plan: Plan,
        input: &str,
    ) -> Result<AdminOutcome<PriceUpdate>> {
        if !self.is_admin(user_id).await? {
            warn!(user_id = %user_id, "Non-admin attempted a price change");
            return Ok(AdminOutcome::Forbidden);
        }
        let Some(price) = parse_price(input) else {
            return Ok(AdminOutcome::Done(PriceUpdate::InvalidInput));
        };
        self.storage.update_subscription_price(plan, price).await?;
        info!(
            user_id = %user_id,
            period = %plan.period,
            vip = plan.is_vip,
            price = %price,
            "Subscription price updated"
        );
        Ok(AdminOutcome::Done(PriceUpdate::Updated(price)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("100"), Some(Decimal::new(100, 0)));
        assert_eq!(parse_price(" 99.90 "), Some(Decimal::new(9990, 2)));
        assert_eq!(parse_price("12,5"), Some(Decimal::new(125, 1)));
        assert_eq!(parse_price("0"), None);
        assert_eq!(parse_price("-5"), None);
        assert_eq!(parse_price("1.234"), None);
        assert_eq!(parse_price("abc"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("100000000"), None);
        assert_eq!(parse_price("99999999.99"), Some(Decimal::new(9_999_999_999, 2)));
    }
}
