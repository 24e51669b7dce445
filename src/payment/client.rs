use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};
use crate::payment::signature::{self, SignMode};

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the points-based payment gateway.
///
/// Calls are never retried here: re-posting a payment creation can mint a
/// duplicate external transaction. Retry policy belongs to the caller.
#[derive(Clone)]
pub struct PaymentClient {
    base_url: String,
    merchant_id: String,
    secret_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentRequest {
    pub amount: i64,
    pub description: String,
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentResponse {
    pub payment_url: String,
    pub transaction_id: String,
    pub status: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct QueryPaymentResponse {
    pub transaction_id: String,
    pub status: String,
    pub amount: i64,
    #[serde(default)]
    pub platform_fee: i64,
    #[serde(default)]
    pub merchant_points: i64,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default)]
    pub expired: bool,
}

/// Query-string fields the gateway sends on a completed payment, minus the
/// signature. Field names double as canonicalization keys.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub transaction_id: String,
    pub external_reference: String,
    pub amount: i64,
    pub platform_fee: i64,
    pub merchant_points: i64,
    pub status: String,
    pub paid_at: String,
}

impl PaymentClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            merchant_id: config.merchant_id.clone(),
            secret_key: config.secret_key.clone(),
            http,
        })
    }

    /// An unconfigured gateway is an operating mode, not an error: orders
    /// then complete through the free path without an external payment.
    pub fn is_configured(&self) -> bool {
        !self.merchant_id.is_empty() && !self.secret_key.is_empty()
    }

    pub async fn create_payment(
        &self,
        req: &CreatePaymentRequest,
    ) -> AppResult<CreatePaymentResponse> {
        let mut params = BTreeMap::new();
        params.insert("amount".to_string(), req.amount.to_string());
        params.insert("description".to_string(), req.description.clone());
        params.insert("order_id".to_string(), req.order_id.clone());

        let url = format!("{}/payment/pay/{}/process", self.base_url, self.merchant_id);
        self.post_signed(&url, params).await
    }

    pub async fn query_payment(&self, transaction_id: &str) -> AppResult<QueryPaymentResponse> {
        let mut params = BTreeMap::new();
        params.insert("transaction_id".to_string(), transaction_id.to_string());

        let url = format!("{}/payment/query/{}", self.base_url, self.merchant_id);
        self.post_signed(&url, params).await
    }

    /// Verify an inbound callback signature (direct-secret mode) before any
    /// of its fields are trusted.
    pub fn verify_callback(&self, params: &CallbackParams, received_signature: &str) -> bool {
        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), params.amount.to_string());
        fields.insert(
            "external_reference".to_string(),
            params.external_reference.clone(),
        );
        fields.insert(
            "merchant_points".to_string(),
            params.merchant_points.to_string(),
        );
        fields.insert("paid_at".to_string(), params.paid_at.clone());
        fields.insert("platform_fee".to_string(), params.platform_fee.to_string());
        fields.insert("status".to_string(), params.status.clone());
        fields.insert("transaction_id".to_string(), params.transaction_id.clone());

        signature::verify(
            &fields,
            &self.secret_key,
            received_signature,
            SignMode::DirectSecret,
        )
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        mut params: BTreeMap<String, String>,
    ) -> AppResult<T> {
        let sig = signature::sign(&params, &self.secret_key, SignMode::TokenHash);
        params.insert("signature".to_string(), sig);

        let resp = self
            .http
            .post(url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::GatewayUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::GatewayUnavailable(format!(
                "status={status}, body={body}"
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("invalid response body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::signature::sign;

    fn client(merchant_id: &str, secret: &str) -> PaymentClient {
        PaymentClient::new(&GatewayConfig {
            base_url: "https://gateway.example.com/".to_string(),
            merchant_id: merchant_id.to_string(),
            secret_key: secret.to_string(),
        })
        .unwrap()
    }

    fn callback() -> CallbackParams {
        CallbackParams {
            transaction_id: "tx-100".to_string(),
            external_reference: "202401011200001234".to_string(),
            amount: 200,
            platform_fee: 4,
            merchant_points: 196,
            status: "completed".to_string(),
            paid_at: "2024-01-01T12:05:00Z".to_string(),
        }
    }

    fn sign_callback(params: &CallbackParams, secret: &str) -> String {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("amount".to_string(), params.amount.to_string());
        fields.insert(
            "external_reference".to_string(),
            params.external_reference.clone(),
        );
        fields.insert(
            "merchant_points".to_string(),
            params.merchant_points.to_string(),
        );
        fields.insert("paid_at".to_string(), params.paid_at.clone());
        fields.insert("platform_fee".to_string(), params.platform_fee.to_string());
        fields.insert("status".to_string(), params.status.clone());
        fields.insert("transaction_id".to_string(), params.transaction_id.clone());
        sign(&fields, secret, SignMode::DirectSecret)
    }

    #[test]
    fn configured_requires_both_credentials() {
        assert!(client("m1", "s1").is_configured());
        assert!(!client("", "s1").is_configured());
        assert!(!client("m1", "").is_configured());
    }

    #[test]
    fn callback_verification_accepts_valid_signature() {
        let c = client("m1", "s3cret");
        let params = callback();
        let sig = sign_callback(&params, "s3cret");
        assert!(c.verify_callback(&params, &sig));
    }

    #[test]
    fn callback_verification_rejects_tampered_amount() {
        let c = client("m1", "s3cret");
        let mut params = callback();
        let sig = sign_callback(&params, "s3cret");
        params.amount = 1;
        assert!(!c.verify_callback(&params, &sig));
    }

    #[test]
    fn callback_verification_rejects_wrong_secret() {
        let c = client("m1", "s3cret");
        let params = callback();
        let sig = sign_callback(&params, "other-secret");
        assert!(!c.verify_callback(&params, &sig));
    }
}
