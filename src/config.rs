// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup. Provider
//! clients additionally read their own `PAYPAL_*` / `WHISH_*` variable
//! blocks (see `providers::paypal` and `providers::whish`).
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the ledger database | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `MIN_CASHOUT_CREDITS` | Smallest gross payout accepted | `5` |
//! | `PAYOUT_FEE_BPS` | Platform fee in basis points (admins pay none) | `2000` |
//! | `METHOD_DETAILS_KEY` | base64 32-byte AES key sealing payout methods | Required for payout methods |
//! | `RECONCILE_INTERVAL_SECS` | Seconds between reconciliation sweeps | `300` |
//! | `RECONCILE_BATCH_LIMIT` | Payouts examined per sweep | `50` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::storage::MethodCipher;

const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_MIN_CASHOUT_CREDITS: u64 = 5;
const DEFAULT_PAYOUT_FEE_BPS: u32 = 2_000;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;
const DEFAULT_RECONCILE_BATCH_LIMIT: usize = 50;

/// Ledger-level runtime settings.
#[derive(Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Smallest gross amount a payout request may carry.
    pub min_cashout_credits: u64,
    /// Platform fee taken from each payout, in basis points of the gross.
    pub payout_fee_bps: u32,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_limit: usize,
    /// Sealer for payout method payloads; absent when no key is configured,
    /// which disables the payout-methods API.
    pub method_cipher: Option<Arc<MethodCipher>>,
}

impl Settings {
    pub fn from_env() -> Self {
        let method_cipher = env_optional("METHOD_DETAILS_KEY").and_then(|key| {
            match MethodCipher::from_base64_key(&key) {
                Ok(cipher) => Some(Arc::new(cipher)),
                Err(error) => {
                    warn!(%error, "METHOD_DETAILS_KEY is unusable; payout methods disabled");
                    None
                }
            }
        });

        Self {
            host: env_or_default("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8080),
            data_dir: PathBuf::from(env_or_default("DATA_DIR", DEFAULT_DATA_DIR)),
            min_cashout_credits: env_parse_or("MIN_CASHOUT_CREDITS", DEFAULT_MIN_CASHOUT_CREDITS),
            payout_fee_bps: env_parse_or("PAYOUT_FEE_BPS", DEFAULT_PAYOUT_FEE_BPS),
            reconcile_interval_secs: env_parse_or(
                "RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            ),
            reconcile_batch_limit: env_parse_or(
                "RECONCILE_BATCH_LIMIT",
                DEFAULT_RECONCILE_BATCH_LIMIT,
            ),
            method_cipher,
        }
    }

    /// Fee rate applied to a requester. Admin cashouts carry no fee.
    pub fn fee_bps_for(&self, is_admin: bool) -> u32 {
        if is_admin {
            0
        } else {
            self.payout_fee_bps
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: std::env::temp_dir(),
            min_cashout_credits: 5,
            payout_fee_bps: 2_000,
            reconcile_interval_secs: 300,
            reconcile_batch_limit: 50,
            method_cipher: Some(Arc::new(
                MethodCipher::from_key_bytes(&[42u8; 32]).expect("test cipher"),
            )),
        }
    }
}

/// Platform fee for a gross payout amount: `floor(gross × bps / 10_000)`.
pub fn payout_fee(gross: u64, fee_bps: u32) -> u64 {
    ((gross as u128 * fee_bps as u128) / 10_000) as u64
}

/// Read a trimmed, non-empty environment variable.
pub(crate) fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read an environment variable, falling back to a default.
pub(crate) fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

/// Read and parse an environment variable, falling back to a default.
pub(crate) fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_optional(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
