// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Whish hosted-collect integration (deposits only).
//!
//! Whish has no create-payment API in this integration; the collect URL is
//! built locally from merchant configuration and the client is redirected
//! to it. Payment outcome arrives on the callback URL, authenticated by an
//! HMAC-SHA256 signature over the raw body when a webhook secret is
//! configured.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use base64ct::{Base64, Encoding};

use super::{CreatedDeposit, ProviderError};
use crate::config::{env_optional, env_or_default};
use crate::storage::TransactionRecord;

const DEFAULT_CURRENCY: &str = "USD";

/// Header carrying the base64 HMAC-SHA256 of the callback body.
pub const SIGNATURE_HEADER: &str = "x-whish-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct WhishCollect {
    collect_base_url: String,
    merchant_id: String,
    currency: String,
    webhook_url: Option<String>,
    return_url: Option<String>,
    webhook_secret: Option<String>,
}

impl WhishCollect {
    pub fn is_configured() -> bool {
        env_optional("WHISH_COLLECT_BASE_URL").is_some()
            && env_optional("WHISH_MERCHANT_ID").is_some()
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let collect_base_url = env_optional("WHISH_COLLECT_BASE_URL").ok_or_else(|| {
            ProviderError::ConfigurationMissing("WHISH_COLLECT_BASE_URL".to_string())
        })?;
        let merchant_id = env_optional("WHISH_MERCHANT_ID")
            .ok_or_else(|| ProviderError::ConfigurationMissing("WHISH_MERCHANT_ID".to_string()))?;

        Ok(Self {
            collect_base_url: collect_base_url.trim_end_matches('/').to_string(),
            merchant_id,
            currency: env_or_default("WHISH_CURRENCY", DEFAULT_CURRENCY).to_ascii_uppercase(),
            webhook_url: env_optional("WHISH_WEBHOOK_URL"),
            return_url: env_optional("WHISH_RETURN_URL"),
            webhook_secret: env_optional("WHISH_WEBHOOK_SECRET"),
        })
    }

    /// Build the hosted collect URL for a pending purchase transaction.
    /// The transaction's reference doubles as the provider reference so the
    /// callback can be correlated without a provider-assigned id.
    pub fn create_collect(
        &self,
        transaction: &TransactionRecord,
    ) -> Result<CreatedDeposit, ProviderError> {
        let reference = transaction.reference_id.as_deref().ok_or_else(|| {
            ProviderError::RequestFailed("transaction carries no reference".to_string())
        })?;

        let mut url = Url::parse(&format!("{}/collect", self.collect_base_url))
            .map_err(|e| ProviderError::ConfigurationMissing(format!("collect base url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("merchant_id", &self.merchant_id);
            query.append_pair("reference", reference);
            query.append_pair("amount", &transaction.amount.to_string());
            query.append_pair("currency", &self.currency);
            if let Some(callback) = self.webhook_url.as_deref() {
                query.append_pair("callback_url", callback);
            }
            if let Some(return_url) = self.return_url.as_deref() {
                query.append_pair("return_url", return_url);
            }
            query.append_pair("customer_id", &transaction.user_id);
        }

        Ok(CreatedDeposit {
            collect_url: url.to_string(),
            provider_reference: reference.to_string(),
            raw: serde_json::json!({ "collect_url": url.to_string() }),
        })
    }

    /// Verify a callback signature against the raw body.
    ///
    /// Without a configured secret the integration cannot authenticate
    /// callbacks and accepts them (sandbox setups); with a secret, a
    /// missing or wrong signature is rejected.
    pub fn verify_signature(&self, body: &[u8], provided: Option<&str>) -> bool {
        let Some(secret) = self.webhook_secret.as_deref() else {
            return true;
        };
        let Some(provided) = provided else {
            return false;
        };
        let Ok(signature) = Base64::decode_vec(provided.trim()) else {
            return false;
        };

        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(body);
        mac.verify_slice(&signature).is_ok()
    }

    pub fn requires_signature(&self) -> bool {
        self.webhook_secret.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TransactionKind;

    fn client(secret: Option<&str>) -> WhishCollect {
        WhishCollect {
            collect_base_url: "https://collect.whish.example".to_string(),
            merchant_id: "m-42".to_string(),
            currency: "USD".to_string(),
            webhook_url: Some("https://api.skillswap.example/webhooks/whish".to_string()),
            return_url: Some("https://skillswap.example/credits".to_string()),
            webhook_secret: secret.map(str::to_string),
        }
    }

    fn pending_purchase() -> TransactionRecord {
        TransactionRecord::new_pending(
            "u1",
            TransactionKind::CreditPurchase,
            25,
            0,
            Some("whish_collect_abc".to_string()),
        )
    }

    #[test]
    fn collect_url_carries_merchant_reference_and_amount() {
        let created = client(None).create_collect(&pending_purchase()).unwrap();
        assert_eq!(created.provider_reference, "whish_collect_abc");

        let url = Url::parse(&created.collect_url).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("merchant_id".to_string(), "m-42".to_string())));
        assert!(pairs.contains(&("reference".to_string(), "whish_collect_abc".to_string())));
        assert!(pairs.contains(&("amount".to_string(), "25".to_string())));
        assert!(pairs.contains(&("customer_id".to_string(), "u1".to_string())));
    }

    #[test]
    fn transaction_without_reference_is_rejected() {
        let mut tx = pending_purchase();
        tx.reference_id = None;
        assert!(client(None).create_collect(&tx).is_err());
    }

    #[test]
    fn signature_verification_round_trips() {
        let whish = client(Some("topsecret"));
        let body = br#"{"reference":"whish_collect_abc","status":"success"}"#;

        let mut mac = HmacSha256::new_from_slice(b"topsecret").unwrap();
        mac.update(body);
        let signature = Base64::encode_string(&mac.finalize().into_bytes());

        assert!(whish.verify_signature(body, Some(&signature)));
        assert!(!whish.verify_signature(body, Some("AAAA")));
        assert!(!whish.verify_signature(b"tampered", Some(&signature)));
        assert!(!whish.verify_signature(body, None));
    }

    #[test]
    fn missing_secret_accepts_unsigned_callbacks() {
        let whish = client(None);
        assert!(!whish.requires_signature());
        assert!(whish.verify_signature(b"anything", None));
    }
}
