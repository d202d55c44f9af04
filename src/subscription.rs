//! # Subscription Plans
//!
//! Billing periods, subscription tiers and payment statuses shared by the
//! persistence layer, the reconciliation flow and the bot UI.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Billing and statistics period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Day, Period::Week, Period::Month];

    /// Stable tag used in callback data and the `period` columns
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }

    /// Length of the access window bought for this period, also the
    /// look-back window for statistics.
    pub fn duration(&self) -> Duration {
        match self {
            Period::Day => Duration::days(1),
            Period::Week => Duration::weeks(1),
            Period::Month => Duration::days(30),
        }
    }

    /// Parse a period for payment creation, falling back to a single day
    /// when the tag is malformed.
    pub fn parse_or_day(tag: &str) -> Period {
        tag.parse().unwrap_or_else(|_| {
            warn!(period = %tag, "Unknown payment period, falling back to day");
            Period::Day
        })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a period tag is not one of `day`, `week`, `month`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period: {0}")]
pub struct InvalidPeriod(pub String);

impl FromStr for Period {
    type Err = InvalidPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(InvalidPeriod(other.to_string())),
        }
    }
}

/// A purchasable combination of period and tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Plan {
    pub period: Period,
    pub is_vip: bool,
}

impl Plan {
    pub fn normal(period: Period) -> Self {
        Self {
            period,
            is_vip: false,
        }
    }

    pub fn vip(period: Period) -> Self {
        Self {
            period,
            is_vip: true,
        }
    }

    /// Plans offered in the payment and price-management menus
    pub fn catalog() -> [Plan; 4] {
        [
            Plan::normal(Period::Day),
            Plan::normal(Period::Week),
            Plan::normal(Period::Month),
            Plan::vip(Period::Month),
        ]
    }

    pub fn tier_tag(&self) -> &'static str {
        if self.is_vip {
            "vip"
        } else {
            "normal"
        }
    }
}

/// Stored payment status.
///
/// Removal is modelled as row deletion, so only the two live states exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Success,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            other => Err(anyhow::anyhow!("unknown payment status: {other}")),
        }
    }
}
