// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Saved payout destinations with sealed routing details.
//!
//! The sensitive payload (recipient email, account identifiers) is stored
//! only as AES-256-GCM ciphertext under a key supplied via configuration,
//! and decrypted on demand when a payout is hydrated for execution. API
//! responses only ever see the safe projection.

use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use base64ct::{Base64, Encoding};

use super::ledger_db::{
    get_json, put_json, scan_json, LedgerDb, LedgerError, LedgerResult, PAYOUT_METHODS,
};
use crate::providers::ProviderKind;

/// AEAD sealer for payout method payloads.
pub struct MethodCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

#[derive(Debug, thiserror::Error)]
pub enum MethodSealError {
    #[error("method details key must be 32 bytes of base64: {0}")]
    BadKey(String),

    #[error("failed to seal method details")]
    Seal,

    #[error("failed to open method details")]
    Open,

    #[error("method details payload was invalid: {0}")]
    Payload(String),
}

impl MethodCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, MethodSealError> {
        let bytes = Base64::decode_vec(encoded.trim())
            .map_err(|e| MethodSealError::BadKey(e.to_string()))?;
        Self::from_key_bytes(&bytes)
    }

    /// Build a cipher from raw key bytes (must be 32).
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, MethodSealError> {
        let unbound = UnboundKey::new(&AES_256_GCM, bytes)
            .map_err(|_| MethodSealError::BadKey(format!("got {} bytes", bytes.len())))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a details payload. Output is base64(nonce || ciphertext+tag).
    pub fn seal(&self, details: &Value) -> Result<String, MethodSealError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| MethodSealError::Seal)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out =
            serde_json::to_vec(details).map_err(|e| MethodSealError::Payload(e.to_string()))?;
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| MethodSealError::Seal)?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&in_out);
        Ok(Base64::encode_string(&blob))
    }

    /// Decrypt a sealed payload back into its JSON details.
    pub fn open(&self, sealed: &str) -> Result<Value, MethodSealError> {
        let blob = Base64::decode_vec(sealed.trim()).map_err(|_| MethodSealError::Open)?;
        if blob.len() <= NONCE_LEN {
            return Err(MethodSealError::Open);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| MethodSealError::Open)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| MethodSealError::Open)?;
        serde_json::from_slice(plaintext).map_err(|e| MethodSealError::Payload(e.to_string()))
    }
}

/// Persisted payout method.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayoutMethodRecord {
    /// Unique method identifier (UUID).
    pub method_id: String,
    /// Owning user.
    pub user_id: String,
    /// Provider the method routes through.
    pub provider: ProviderKind,
    /// Routing method, e.g. `paypal_email` or `bank_transfer`.
    pub method: String,
    /// base64(nonce || AES-256-GCM(details JSON)).
    pub details_encrypted: String,
    /// At most one default per (user, provider).
    pub is_default: bool,
    /// Set once the destination has been verified out of band.
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl PayoutMethodRecord {
    pub fn new(
        user_id: impl Into<String>,
        provider: ProviderKind,
        method: impl Into<String>,
        details_encrypted: String,
        is_default: bool,
    ) -> Self {
        Self {
            method_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            provider,
            method: method.into(),
            details_encrypted,
            is_default,
            is_verified: false,
            created_at: Utc::now(),
        }
    }
}

/// Project decrypted details down to the fields safe to return to clients.
/// Recipient identifiers are masked.
pub fn safe_details(details: &Value) -> Value {
    let mut safe = serde_json::Map::new();
    if let Some(label) = details.get("label").and_then(Value::as_str) {
        safe.insert("label".to_string(), json!(label));
    }
    if let Some(last4) = details.get("last4").and_then(Value::as_str) {
        safe.insert("last4".to_string(), json!(last4));
    }
    let receiver = details
        .get("receiver")
        .or_else(|| details.get("email"))
        .and_then(Value::as_str);
    if let Some(receiver) = receiver {
        safe.insert("receiver".to_string(), json!(mask_recipient(receiver)));
    }
    Value::Object(safe)
}

fn mask_recipient(recipient: &str) -> String {
    match recipient.split_once('@') {
        Some((local, domain)) => {
            let head = local.chars().next().map(String::from).unwrap_or_default();
            format!("{head}***@{domain}")
        }
        None if recipient.len() > 4 => {
            format!("***{}", &recipient[recipient.len() - 4..])
        }
        None => "***".to_string(),
    }
}

impl LedgerDb {
    /// Get a payout method by ID.
    pub fn payout_method(&self, method_id: &str) -> LedgerResult<PayoutMethodRecord> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PAYOUT_METHODS)?;
        get_json(&table, method_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("payout method {method_id}")))
    }

    /// All methods for a user, defaults first, then newest first.
    pub fn list_payout_methods(&self, user_id: &str) -> LedgerResult<Vec<PayoutMethodRecord>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PAYOUT_METHODS)?;
        let mut records: Vec<PayoutMethodRecord> = scan_json(&table)?
            .into_iter()
            .filter(|record: &PayoutMethodRecord| record.user_id == user_id)
            .collect();
        records.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(records)
    }

    /// The user's default method for a provider, if configured.
    pub fn default_payout_method(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> LedgerResult<Option<PayoutMethodRecord>> {
        Ok(self
            .list_payout_methods(user_id)?
            .into_iter()
            .find(|record| record.provider == provider && record.is_default))
    }

    /// Insert a method. When `is_default` is set (or the user had no method
    /// for this provider yet), any previous default for the same provider is
    /// cleared in the same transaction.
    pub fn insert_payout_method(
        &self,
        mut record: PayoutMethodRecord,
    ) -> LedgerResult<PayoutMethodRecord> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(PAYOUT_METHODS)?;
            let existing: Vec<PayoutMethodRecord> = scan_json(&table)?
                .into_iter()
                .filter(|r: &PayoutMethodRecord| {
                    r.user_id == record.user_id && r.provider == record.provider
                })
                .collect();

            if existing.is_empty() {
                record.is_default = true;
            }
            if record.is_default {
                for mut other in existing {
                    if other.is_default {
                        other.is_default = false;
                        put_json(&mut table, &other.method_id.clone(), &other)?;
                    }
                }
            }
            put_json(&mut table, &record.method_id.clone(), &record)?;
        }
        write_txn.commit()?;
        Ok(record)
    }

    /// Make a method the default for its (user, provider) pair.
    pub fn set_default_payout_method(
        &self,
        user_id: &str,
        method_id: &str,
    ) -> LedgerResult<PayoutMethodRecord> {
        let write_txn = self.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(PAYOUT_METHODS)?;
            let mut record: PayoutMethodRecord = get_json(&table, method_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("payout method {method_id}")))?;
            if record.user_id != user_id {
                return Err(LedgerError::NotFound(format!("payout method {method_id}")));
            }

            let siblings: Vec<PayoutMethodRecord> = scan_json(&table)?
                .into_iter()
                .filter(|r: &PayoutMethodRecord| {
                    r.user_id == user_id && r.provider == record.provider
                })
                .collect();
            for mut other in siblings {
                if other.is_default && other.method_id != method_id {
                    other.is_default = false;
                    put_json(&mut table, &other.method_id.clone(), &other)?;
                }
            }

            record.is_default = true;
            put_json(&mut table, method_id, &record)?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Delete a user's payout method.
    pub fn delete_payout_method(&self, user_id: &str, method_id: &str) -> LedgerResult<()> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(PAYOUT_METHODS)?;
            let record: PayoutMethodRecord = get_json(&table, method_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("payout method {method_id}")))?;
            if record.user_id != user_id {
                return Err(LedgerError::NotFound(format!("payout method {method_id}")));
            }
            table.remove(method_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
