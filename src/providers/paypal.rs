// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! PayPal integration: Payouts Batch API for cashouts, Checkout Orders API
//! for credit purchases.
//!
//! One payout per batch; the batch's `sender_batch_id` is the payout's
//! idempotency key, so a retried submission is recognized by PayPal as a
//! duplicate instead of producing a second transfer.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::credentials::TokenCache;
use super::{CreatedDeposit, CreatedPayout, DepositContext, PayoutStatusDetails, ProviderError, RemotePayoutStatus};
use crate::config::{env_optional, env_or_default, env_parse_or};
use crate::storage::{PayoutRecord, TransactionRecord};

const DEFAULT_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_PAYOUT_NOTE: &str = "SkillSwap cashout";
const DEFAULT_PAYOUT_EMAIL_SUBJECT: &str = "You have a payout from SkillSwap";
const BRAND_NAME: &str = "SkillSwap";

#[derive(Debug)]
pub struct PayPalClient {
    base_url: String,
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
    currency: String,
    payout_note: String,
    payout_email_subject: String,
    return_url: Option<String>,
    cancel_url: Option<String>,
    app_url: Option<String>,
    http: Client,
    tokens: TokenCache,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl PayPalClient {
    pub fn is_configured() -> bool {
        env_optional("PAYPAL_CLIENT_ID").is_some() && env_optional("PAYPAL_SECRET").is_some()
    }

    /// Build a client from the `PAYPAL_*` environment block. The token
    /// cache is passed in so tests and long-lived state can own it.
    pub fn from_env(tokens: TokenCache) -> Result<Self, ProviderError> {
        let client_id = env_optional("PAYPAL_CLIENT_ID")
            .ok_or_else(|| ProviderError::ConfigurationMissing("PAYPAL_CLIENT_ID".to_string()))?;
        let client_secret = env_optional("PAYPAL_SECRET")
            .ok_or_else(|| ProviderError::ConfigurationMissing("PAYPAL_SECRET".to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(env_parse_or(
                "PAYPAL_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )))
            .build()
            .map_err(|e| ProviderError::RequestFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: env_or_default("PAYPAL_BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client_id,
            client_secret,
            webhook_id: env_optional("PAYPAL_WEBHOOK_ID"),
            currency: env_or_default("PAYPAL_CURRENCY", DEFAULT_CURRENCY).to_ascii_uppercase(),
            payout_note: env_or_default("PAYPAL_PAYOUT_NOTE", DEFAULT_PAYOUT_NOTE),
            payout_email_subject: env_or_default(
                "PAYPAL_PAYOUT_EMAIL_SUBJECT",
                DEFAULT_PAYOUT_EMAIL_SUBJECT,
            ),
            return_url: env_optional("PAYPAL_RETURN_URL"),
            cancel_url: env_optional("PAYPAL_CANCEL_URL"),
            app_url: env_optional("APP_URL").map(|u| u.trim_end_matches('/').to_string()),
            http,
            tokens,
        })
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.tokens.get().await {
            return Ok(token);
        }

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ProviderError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Auth(format!(
                "token request returned {status}: {body}"
            )));
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Auth(format!("invalid token response: {e}")))?;

        if token_response.access_token.trim().is_empty() || token_response.expires_in == 0 {
            return Err(ProviderError::Auth(
                "token response missing access_token or expiry".to_string(),
            ));
        }

        self.tokens
            .store(&token_response.access_token, token_response.expires_in)
            .await;
        Ok(token_response.access_token)
    }

    /// Submit a single-item payout batch. Idempotent on the payout's
    /// idempotency key: a `DUPLICATE_SENDER_BATCH_ID` rejection means the
    /// batch already exists, so the original reference is returned as
    /// success.
    pub async fn create_payout(
        &self,
        payout: &PayoutRecord,
    ) -> Result<CreatedPayout, ProviderError> {
        let receiver = payout
            .method_details
            .as_ref()
            .and_then(|details| details.get("receiver"))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ProviderError::ConfigurationMissing(
                    "payout receiver not present in method details".to_string(),
                )
            })?;

        let sender_batch_id = payout.idempotency_key.as_str();
        let body = json!({
            "sender_batch_header": {
                "sender_batch_id": sender_batch_id,
                "email_subject": self.payout_email_subject,
            },
            "items": [
                {
                    "recipient_type": "EMAIL",
                    "amount": {
                        "value": credits_to_amount(payout.net_amount),
                        "currency": self.currency,
                    },
                    "receiver": receiver,
                    "note": self.payout_note,
                    "sender_item_id": format!("payout_{}", payout.payout_id),
                }
            ],
        });

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/v1/payments/payouts", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("create payout failed: {e}")))?;

        let status = response.status();
        let raw: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let name = raw.get("name").and_then(Value::as_str);
            if status.as_u16() == 400 && name == Some("DUPLICATE_SENDER_BATCH_ID") {
                // The batch exists from a previous attempt; reconciliation
                // can locate it by the sender batch id.
                info!(
                    payout_id = %payout.payout_id,
                    sender_batch_id,
                    "duplicate sender batch id, treating as idempotent success"
                );
                return Ok(CreatedPayout {
                    provider_reference: sender_batch_id.to_string(),
                    raw,
                });
            }
            return Err(ProviderError::RequestFailed(format!(
                "create payout returned {status}: {raw}"
            )));
        }

        let batch_id = raw
            .pointer("/batch_header/payout_batch_id")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            // Fall back to the sender batch id so reconciliation can still
            // locate the batch.
            .unwrap_or(sender_batch_id)
            .to_string();

        Ok(CreatedPayout {
            provider_reference: batch_id,
            raw,
        })
    }

    /// Fetch the batch status for a payout.
    pub async fn payout_status(
        &self,
        payout: &PayoutRecord,
    ) -> Result<PayoutStatusDetails, ProviderError> {
        let Some(reference) = payout.provider_reference.as_deref().filter(|r| !r.is_empty())
        else {
            return Ok(PayoutStatusDetails::unknown(Value::Null));
        };

        let token = self.access_token().await?;
        let path = format!("/v1/payments/payouts/{reference}");
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("GET {path} failed: {e}")))?;

        if !response.status().is_success() {
            // The provider answered but not conclusively; stay inconclusive
            // and let a later sweep retry.
            let raw: Value = response.json().await.unwrap_or(Value::Null);
            return Ok(PayoutStatusDetails::unknown(raw));
        }

        let raw: Value = response.json().await.map_err(|e| {
            ProviderError::ResponseMalformed(format!("GET {path} invalid JSON: {e}"))
        })?;

        let batch_status = raw
            .pointer("/batch_header/batch_status")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let status = map_batch_status(&batch_status);
        let (failure_code, failure_message) = match status {
            RemotePayoutStatus::Failed => (
                Some(batch_status.to_ascii_uppercase()),
                Some(format!(
                    "PayPal payout batch {}",
                    batch_status.to_ascii_lowercase()
                )),
            ),
            _ => (None, None),
        };

        Ok(PayoutStatusDetails {
            status,
            failure_code,
            failure_message,
            raw,
        })
    }

    /// Create a checkout order for a credit purchase and return the
    /// approval link.
    pub async fn create_order(
        &self,
        transaction: &TransactionRecord,
        context: &DepositContext,
    ) -> Result<CreatedDeposit, ProviderError> {
        let (return_url, cancel_url) = self.resolve_redirects(context);
        let invoice_id = transaction
            .reference_id
            .clone()
            .unwrap_or_else(|| format!("pp_inv_{}", uuid::Uuid::new_v4()));

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [
                {
                    "reference_id": "credits",
                    "custom_id": transaction.transaction_id,
                    "invoice_id": invoice_id,
                    "amount": {
                        "currency_code": self.currency,
                        "value": credits_to_amount(transaction.amount),
                    },
                    "description": "SkillSwap credits",
                }
            ],
            "application_context": {
                "return_url": return_url,
                "cancel_url": cancel_url,
                "brand_name": BRAND_NAME,
                "user_action": "PAY_NOW",
            },
        });

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("create order failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "create order returned {status}: {body}"
            )));
        }

        let raw: Value = response.json().await.map_err(|e| {
            ProviderError::ResponseMalformed(format!("create order invalid JSON: {e}"))
        })?;

        let order_id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::ResponseMalformed("order response missing id".to_string())
            })?
            .to_string();

        let approval_url = approval_link(&raw).ok_or_else(|| {
            ProviderError::ResponseMalformed("order response missing approval url".to_string())
        })?;

        Ok(CreatedDeposit {
            collect_url: approval_url,
            provider_reference: order_id,
            raw,
        })
    }

    /// Capture an approved order server-side. Idempotent on PayPal's side.
    pub async fn capture_order(&self, order_id: &str) -> Result<Value, ProviderError> {
        let token = self.access_token().await?;
        let path = format!("/v2/checkout/orders/{order_id}/capture");
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("capture failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "capture returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ResponseMalformed(format!("capture invalid JSON: {e}")))
    }

    /// Verify an inbound webhook using PayPal's verification endpoint and
    /// the transmission headers persisted at ingestion.
    pub async fn verify_webhook_signature(
        &self,
        headers: &BTreeMap<String, String>,
        event: &Value,
    ) -> Result<bool, ProviderError> {
        let webhook_id = self.webhook_id.as_deref().ok_or_else(|| {
            ProviderError::ConfigurationMissing("PAYPAL_WEBHOOK_ID".to_string())
        })?;

        let header = |name: &str| headers.get(name).map(String::as_str).unwrap_or("");
        let body = json!({
            "auth_algo": header("paypal-auth-algo"),
            "cert_url": header("paypal-cert-url"),
            "transmission_id": header("paypal-transmission-id"),
            "transmission_sig": header("paypal-transmission-sig"),
            "transmission_time": header("paypal-transmission-time"),
            "webhook_id": webhook_id,
            "webhook_event": event,
        });

        let verification = self
            .post_json("/v1/notifications/verify-webhook-signature", &body)
            .await?;
        let status = verification
            .get("verification_status")
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(status.eq_ignore_ascii_case("SUCCESS"))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("POST {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "POST {path} returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ResponseMalformed(format!("POST {path} invalid JSON: {e}")))
    }

    fn resolve_redirects(&self, context: &DepositContext) -> (String, String) {
        let fallback = |suffix: &str| {
            self.app_url
                .as_deref()
                .map(|base| format!("{base}{suffix}"))
                .unwrap_or_else(|| format!("https://skillswap.example{suffix}"))
        };
        let return_url = context
            .return_url
            .clone()
            .or_else(|| self.return_url.clone())
            .unwrap_or_else(|| fallback("/credits/status"));
        let cancel_url = context
            .cancel_url
            .clone()
            .or_else(|| self.cancel_url.clone())
            .unwrap_or_else(|| fallback("/credits"));
        (return_url, cancel_url)
    }
}

/// 1 credit is sold and paid out at 1 currency unit.
pub fn credits_to_amount(credits: u64) -> String {
    format!("{credits}.00")
}

/// Map a payout batch status onto the system vocabulary.
pub fn map_batch_status(raw_status: &str) -> RemotePayoutStatus {
    match raw_status.trim().to_ascii_uppercase().as_str() {
        "SUCCESS" => RemotePayoutStatus::Paid,
        "DENIED" | "CANCELED" | "FAILED" => RemotePayoutStatus::Failed,
        "" => RemotePayoutStatus::Unknown,
        _ => RemotePayoutStatus::Processing,
    }
}

/// Map a payouts-item `transaction_status` onto the system vocabulary.
/// Anything unrecognized is `Unknown` and leaves the payout untouched.
pub fn map_item_status(raw_status: &str) -> RemotePayoutStatus {
    match raw_status.trim().to_ascii_uppercase().as_str() {
        "SUCCESS" | "SUCCESSFUL" | "COMPLETED" => RemotePayoutStatus::Paid,
        "FAILED" | "DENIED" | "CANCELED" | "CANCELLED" => RemotePayoutStatus::Failed,
        _ => RemotePayoutStatus::Unknown,
    }
}

/// Pull the checkout order id out of a webhook event, for both order and
/// capture event families.
pub fn order_id_from_event(event_type: &str, resource: &Value) -> Option<String> {
    if event_type.starts_with("CHECKOUT.ORDER.") {
        return resource
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }
    if event_type.starts_with("PAYMENT.CAPTURE.") {
        return resource
            .pointer("/supplementary_data/related_ids/order_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }
    None
}

/// Pull the payout batch id out of a webhook event resource.
pub fn batch_id_from_resource(resource: &Value) -> Option<String> {
    resource
        .get("payout_batch_id")
        .and_then(Value::as_str)
        .or_else(|| {
            resource
                .pointer("/batch_header/payout_batch_id")
                .and_then(Value::as_str)
        })
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn approval_link(order: &Value) -> Option<String> {
    order
        .get("links")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("approve"))
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_status_mapping_is_stable() {
        assert_eq!(map_batch_status("SUCCESS"), RemotePayoutStatus::Paid);
        assert_eq!(map_batch_status("denied"), RemotePayoutStatus::Failed);
        assert_eq!(map_batch_status("CANCELED"), RemotePayoutStatus::Failed);
        assert_eq!(map_batch_status("PENDING"), RemotePayoutStatus::Processing);
        assert_eq!(map_batch_status(""), RemotePayoutStatus::Unknown);
    }

    #[test]
    fn item_status_mapping_leaves_unrecognized_values_alone() {
        assert_eq!(map_item_status("SUCCESS"), RemotePayoutStatus::Paid);
        assert_eq!(map_item_status("successful"), RemotePayoutStatus::Paid);
        assert_eq!(map_item_status("CANCELLED"), RemotePayoutStatus::Failed);
        assert_eq!(map_item_status("ONHOLD"), RemotePayoutStatus::Unknown);
        assert_eq!(map_item_status(""), RemotePayoutStatus::Unknown);
    }

    #[test]
    fn order_id_extraction_covers_both_event_families() {
        let order_resource = json!({"id": "ORDER-1"});
        assert_eq!(
            order_id_from_event("CHECKOUT.ORDER.APPROVED", &order_resource),
            Some("ORDER-1".to_string())
        );

        let capture_resource = json!({
            "supplementary_data": {"related_ids": {"order_id": "ORDER-2"}}
        });
        assert_eq!(
            order_id_from_event("PAYMENT.CAPTURE.COMPLETED", &capture_resource),
            Some("ORDER-2".to_string())
        );

        assert_eq!(
            order_id_from_event("PAYMENT.PAYOUTS-ITEM.SUCCEEDED", &order_resource),
            None
        );
    }

    #[test]
    fn batch_id_extraction_checks_both_shapes() {
        assert_eq!(
            batch_id_from_resource(&json!({"payout_batch_id": "B-1"})),
            Some("B-1".to_string())
        );
        assert_eq!(
            batch_id_from_resource(&json!({"batch_header": {"payout_batch_id": "B-2"}})),
            Some("B-2".to_string())
        );
        assert_eq!(batch_id_from_resource(&json!({"id": "x"})), None);
    }

    #[test]
    fn approval_link_picks_the_approve_rel() {
        let order = json!({
            "links": [
                {"rel": "self", "href": "https://api/self"},
                {"rel": "approve", "href": "https://paypal/approve"},
            ]
        });
        assert_eq!(
            approval_link(&order),
            Some("https://paypal/approve".to_string())
        );
        assert_eq!(approval_link(&json!({"links": []})), None);
    }

    #[test]
    fn credits_format_as_whole_currency_units() {
        assert_eq!(credits_to_amount(8), "8.00");
        assert_eq!(credits_to_amount(0), "0.00");
    }
}
