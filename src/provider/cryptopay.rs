//! Crypto Pay (CryptoBot) invoices.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::{http_client, Invoice, PaymentProvider, ProviderError};

const MAINNET_URL: &str = "https://pay.crypt.bot";
const TESTNET_URL: &str = "https://testnet-pay.crypt.bot";
const TOKEN_HEADER: &str = "Crypto-Pay-API-Token";

pub struct CryptoPayProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    asset: String,
}

impl CryptoPayProvider {
    pub fn new(api_key: String, testnet: bool, asset: String) -> Result<Self, ProviderError> {
        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL };
        Ok(Self {
            client: http_client()?,
            base_url: base_url.to_string(),
            api_key,
            asset,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/api/{method}", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct CreateInvoiceRequest<'a> {
    asset: &'a str,
    amount: String,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CryptoInvoice {
    invoice_id: i64,
    status: String,
    #[serde(default)]
    pay_url: Option<String>,
    #[serde(default)]
    bot_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    #[serde(default)]
    items: Vec<CryptoInvoice>,
}

fn unwrap_response<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    let response: ApiResponse<T> = serde_json::from_str(body)?;
    if !response.ok {
        let reason = response
            .error
            .map(|e| match (e.code, e.name) {
                (Some(code), Some(name)) => format!("{code} {name}"),
                (_, Some(name)) => name,
                (Some(code), None) => code.to_string(),
                (None, None) => "unknown error".to_string(),
            })
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(ProviderError::Api(reason));
    }
    response
        .result
        .ok_or_else(|| ProviderError::Malformed("missing result".to_string()))
}

/// Extract the payable invoice from a `createInvoice` response
pub fn parse_created_invoice(body: &str) -> Result<Invoice, ProviderError> {
    let invoice: CryptoInvoice = unwrap_response(body)?;
    let payment_url = invoice
        .bot_invoice_url
        .or(invoice.pay_url)
        .ok_or_else(|| ProviderError::Malformed("invoice without payment url".to_string()))?;
    Ok(Invoice {
        payment_url,
        external_id: invoice.invoice_id.to_string(),
    })
}

/// Whether a `getInvoices` response reports the invoice as paid
pub fn invoice_paid(body: &str, external_id: &str) -> Result<bool, ProviderError> {
    let list: InvoiceList = unwrap_response(body)?;
    Ok(list
        .items
        .iter()
        .any(|inv| inv.invoice_id.to_string() == external_id && inv.status == "paid"))
}

#[async_trait]
impl PaymentProvider for CryptoPayProvider {
    async fn create(&self, amount: Decimal, description: &str) -> Result<Invoice, ProviderError> {
        let request = CreateInvoiceRequest {
            asset: &self.asset,
            amount: amount.round_dp(2).to_string(),
            description,
        };
        let body = self
            .client
            .post(self.endpoint("createInvoice"))
            .header(TOKEN_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await?
            .text()
            .await?;

        let invoice = parse_created_invoice(&body)?;
        debug!(invoice_id = %invoice.external_id, asset = %self.asset, "Created Crypto Pay invoice");
        Ok(invoice)
    }

    async fn check_status(&self, external_id: &str) -> Result<bool, ProviderError> {
        let body = self
            .client
            .get(self.endpoint("getInvoices"))
            .header(TOKEN_HEADER, &self.api_key)
            .query(&[("invoice_ids", external_id)])
            .send()
            .await?
            .text()
            .await?;
        invoice_paid(&body, external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_created_invoice() {
        let body = r#"{"ok":true,"result":{"invoice_id":528,"status":"active","hash":"IVx","asset":"TRX","amount":"100","bot_invoice_url":"https://t.me/CryptoTestnetBot?start=IVx"}}"#;
        let invoice = parse_created_invoice(body).unwrap();
        assert_eq!(invoice.external_id, "528");
        assert_eq!(invoice.payment_url, "https://t.me/CryptoTestnetBot?start=IVx");
    }

    #[test]
    fn test_legacy_pay_url_accepted() {
        let body = r#"{"ok":true,"result":{"invoice_id":7,"status":"active","pay_url":"https://t.me/CryptoBot?start=IV7"}}"#;
        assert_eq!(
            parse_created_invoice(body).unwrap().payment_url,
            "https://t.me/CryptoBot?start=IV7"
        );
    }

    #[test]
    fn test_api_error_surfaces() {
        let body = r#"{"ok":false,"error":{"code":401,"name":"UNAUTHORIZED"}}"#;
        assert!(matches!(
            parse_created_invoice(body),
            Err(ProviderError::Api(reason)) if reason == "401 UNAUTHORIZED"
        ));
    }

    #[test]
    fn test_invoice_paid() {
        let paid = r#"{"ok":true,"result":{"items":[{"invoice_id":528,"status":"paid"}]}}"#;
        let active = r#"{"ok":true,"result":{"items":[{"invoice_id":528,"status":"active"}]}}"#;
        let none = r#"{"ok":true,"result":{"items":[]}}"#;
        assert!(invoice_paid(paid, "528").unwrap());
        assert!(!invoice_paid(active, "528").unwrap());
        assert!(!invoice_paid(none, "528").unwrap());
        assert!(!invoice_paid(paid, "529").unwrap());
    }
}
