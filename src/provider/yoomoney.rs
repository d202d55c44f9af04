//! YooMoney quickpay links, polled through the wallet operation history.

use async_trait::async_trait;
use reqwest::Url;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::{http_client, Invoice, PaymentProvider, ProviderError};
use crate::link::generate_payment_label;

const QUICKPAY_URL: &str = "https://yoomoney.ru/quickpay/confirm.xml";
const OPERATION_HISTORY_URL: &str = "https://yoomoney.ru/api/operation-history";

pub struct YooMoneyProvider {
    client: reqwest::Client,
    wallet: String,
    access_token: String,
}

impl YooMoneyProvider {
    pub fn new(wallet: String, access_token: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client()?,
            wallet,
            access_token,
        })
    }
}

/// Quickpay form URL for a transfer to `wallet` tagged with `label`
pub fn quickpay_url(
    wallet: &str,
    amount: Decimal,
    description: &str,
    label: &str,
) -> Result<String, ProviderError> {
    let sum = amount.round_dp(2).to_string();
    let url = Url::parse_with_params(
        QUICKPAY_URL,
        &[
            ("receiver", wallet),
            ("quickpay-form", "shop"),
            ("targets", description),
            ("paymentType", "SB"),
            ("sum", sum.as_str()),
            ("label", label),
        ],
    )
    .map_err(|e| ProviderError::Malformed(e.to_string()))?;
    Ok(url.into())
}

#[derive(Debug, Deserialize)]
struct OperationHistory {
    #[serde(default)]
    operations: Vec<Operation>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    label: Option<String>,
    status: String,
}

/// Whether an operation-history response holds a successful operation for `label`
pub fn operation_succeeded(body: &str, label: &str) -> Result<bool, ProviderError> {
    let history: OperationHistory = serde_json::from_str(body)?;
    if let Some(error) = history.error {
        return Err(ProviderError::Api(error));
    }
    Ok(history
        .operations
        .iter()
        .any(|op| op.status == "success" && op.label.as_deref() == Some(label)))
}

#[async_trait]
impl PaymentProvider for YooMoneyProvider {
    async fn create(&self, amount: Decimal, description: &str) -> Result<Invoice, ProviderError> {
        let label = generate_payment_label();
        let payment_url = quickpay_url(&self.wallet, amount, description, &label)?;
        debug!(label = %label, "Created YooMoney quickpay link");
        Ok(Invoice {
            payment_url,
            external_id: label,
        })
    }

    async fn check_status(&self, external_id: &str) -> Result<bool, ProviderError> {
        let response = self
            .client
            .post(OPERATION_HISTORY_URL)
            .bearer_auth(&self.access_token)
            .form(&[("label", external_id)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Api(format!("{status}: {body}")));
        }
        operation_succeeded(&body, external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quickpay_url_carries_label_and_sum() {
        let url = quickpay_url("4100111", Decimal::new(10000, 2), "Access for a month", "LBL").unwrap();
        assert!(url.starts_with("https://yoomoney.ru/quickpay/confirm.xml?"));
        assert!(url.contains("receiver=4100111"));
        assert!(url.contains("sum=100.00"));
        assert!(url.contains("label=LBL"));
        assert!(url.contains("targets=Access+for+a+month"));
    }

    #[test]
    fn test_operation_success_detection() {
        let paid = r#"{"operations":[{"label":"abc","status":"success","amount":100}]}"#;
        let waiting = r#"{"operations":[{"label":"abc","status":"in_progress"}]}"#;
        let empty = r#"{"operations":[]}"#;
        let unlabelled = r#"{"operations":[{"status":"success","amount":500}]}"#;
        let other = r#"{"operations":[{"label":"xyz","status":"success","amount":100}]}"#;
        assert!(operation_succeeded(paid, "abc").unwrap());
        // Someone else's transfer must not confirm our payment
        assert!(!operation_succeeded(unlabelled, "abc").unwrap());
        assert!(!operation_succeeded(other, "abc").unwrap());
        assert!(!operation_succeeded(waiting, "abc").unwrap());
        assert!(!operation_succeeded(empty, "abc").unwrap());
    }

    #[test]
    fn test_operation_history_error() {
        let body = r#"{"error":"illegal_param_label"}"#;
        assert!(matches!(
            operation_succeeded(body, "abc"),
            Err(ProviderError::Api(e)) if e == "illegal_param_label"
        ));
        assert!(matches!(
            operation_succeeded("not json", "abc"),
            Err(ProviderError::Malformed(_))
        ));
    }
}
