//! # Payment Providers
//!
//! Adapters that create an external invoice and poll whether it was paid.
//! Providers never touch persistence; the reconciliation flow owns every
//! status transition.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProviderConfig;

pub mod cryptopay;
pub mod yoomoney;

pub use cryptopay::CryptoPayProvider;
pub use yoomoney::YooMoneyProvider;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// A payable link together with the reference used to poll its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub payment_url: String,
    pub external_id: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),
    #[error("provider rejected the request: {0}")]
    Api(String),
    #[error("unexpected provider response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create an invoice for `amount` and return where to pay it
    async fn create(&self, amount: Decimal, description: &str) -> Result<Invoice, ProviderError>;

    /// `true` only once the provider reports the invoice as paid
    async fn check_status(&self, external_id: &str) -> Result<bool, ProviderError>;
}

pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Build the provider selected in the configuration
pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn PaymentProvider>, ProviderError> {
    Ok(match config {
        ProviderConfig::YooMoney {
            wallet,
            access_token,
        } => Arc::new(YooMoneyProvider::new(wallet.clone(), access_token.clone())?),
        ProviderConfig::CryptoPay {
            api_key,
            testnet,
            asset,
        } => Arc::new(CryptoPayProvider::new(
            api_key.clone(),
            *testnet,
            asset.clone(),
        )?),
    })
}
