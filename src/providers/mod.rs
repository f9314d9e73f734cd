// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Payment provider abstraction.
//!
//! Two capability sets: payout providers push money out of the platform,
//! deposit providers collect money into it. Concrete variants are a tagged
//! enum rather than trait objects; a single resolver on `AppState` maps a
//! [`ProviderKind`] to an implementation, so there is no open-ended runtime
//! type resolution.
//!
//! ## Contract
//!
//! - `create_payout` MUST be idempotent with respect to the payout's
//!   idempotency key: submitting the same payout twice must not create two
//!   real-world transfers. A provider-side duplicate detection hit is a
//!   success carrying the original reference, not an error.
//! - Status vocabularies from the wire are mapped onto
//!   [`RemotePayoutStatus`]; anything unrecognized is `Unknown` and leaves
//!   the payout untouched for a later sweep.
//! - Network and API failures surface as [`ProviderError`], never as a
//!   success-shaped result.

pub mod credentials;
pub mod manual;
pub mod paypal;
pub mod whish;

pub use credentials::TokenCache;
pub use manual::ManualPayout;
pub use paypal::PayPalClient;
pub use whish::WhishCollect;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::storage::{PayoutRecord, TransactionRecord};

/// Enumerated payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Bank transfer / cash handled by an admin outside the system.
    Manual,
    /// PayPal Payouts + Checkout APIs.
    Paypal,
    /// Whish hosted collect (deposits only).
    Whish,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Manual => "manual",
            ProviderKind::Paypal => "paypal",
            ProviderKind::Whish => "whish",
        }
    }

    pub fn supports_payouts(self) -> bool {
        matches!(self, ProviderKind::Manual | ProviderKind::Paypal)
    }

    pub fn supports_deposits(self) -> bool {
        matches!(self, ProviderKind::Paypal | ProviderKind::Whish)
    }

    /// Parse a provider name (case-insensitive).
    pub fn parse(raw: &str) -> Option<ProviderKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(ProviderKind::Manual),
            "paypal" => Some(ProviderKind::Paypal),
            "whish" => Some(ProviderKind::Whish),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("provider auth failed: {0}")]
    Auth(String),

    #[error("provider request failed: {0}")]
    RequestFailed(String),

    #[error("provider response was invalid: {0}")]
    ResponseMalformed(String),

    #[error("unsupported provider: {0}")]
    Unsupported(String),
}

/// The system's own payout status vocabulary, mapped from whatever the
/// provider reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePayoutStatus {
    Paid,
    Processing,
    Failed,
    Unknown,
}

/// Result of submitting a payout to a provider.
#[derive(Debug, Clone)]
pub struct CreatedPayout {
    /// Provider-assigned reference for later status lookups.
    pub provider_reference: String,
    /// Raw provider response, kept for audit trails.
    pub raw: Value,
}

/// Result of polling a provider for payout status.
#[derive(Debug, Clone)]
pub struct PayoutStatusDetails {
    pub status: RemotePayoutStatus,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub raw: Value,
}

impl PayoutStatusDetails {
    pub fn unknown(raw: Value) -> Self {
        Self {
            status: RemotePayoutStatus::Unknown,
            failure_code: None,
            failure_message: None,
            raw,
        }
    }
}

/// Result of creating a deposit/checkout session.
#[derive(Debug, Clone)]
pub struct CreatedDeposit {
    /// URL the client is redirected to for payment approval.
    pub collect_url: String,
    /// Provider-assigned reference (order id / collect reference).
    pub provider_reference: String,
    /// Raw provider response.
    pub raw: Value,
}

/// Caller-supplied redirect overrides for deposit flows.
#[derive(Debug, Clone, Default)]
pub struct DepositContext {
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// A resolved payout-capable provider.
#[derive(Clone)]
pub enum PayoutProvider {
    Manual(ManualPayout),
    Paypal(Arc<PayPalClient>),
}

impl PayoutProvider {
    /// Submit the payout to the provider. Idempotent on the payout's
    /// idempotency key.
    pub async fn create_payout(
        &self,
        payout: &PayoutRecord,
    ) -> Result<CreatedPayout, ProviderError> {
        match self {
            PayoutProvider::Manual(manual) => manual.create_payout(payout),
            PayoutProvider::Paypal(paypal) => paypal.create_payout(payout).await,
        }
    }

    /// Fetch the provider's view of the payout.
    pub async fn get_status(
        &self,
        payout: &PayoutRecord,
    ) -> Result<PayoutStatusDetails, ProviderError> {
        match self {
            PayoutProvider::Manual(manual) => Ok(manual.get_status(payout)),
            PayoutProvider::Paypal(paypal) => paypal.payout_status(payout).await,
        }
    }
}

/// A resolved deposit-capable provider.
#[derive(Clone)]
pub enum DepositProvider {
    Paypal(Arc<PayPalClient>),
    Whish(Arc<WhishCollect>),
}

impl DepositProvider {
    /// Create a deposit/collect session for a pending purchase transaction.
    pub async fn create_deposit(
        &self,
        transaction: &TransactionRecord,
        context: &DepositContext,
    ) -> Result<CreatedDeposit, ProviderError> {
        match self {
            DepositProvider::Paypal(paypal) => paypal.create_order(transaction, context).await,
            DepositProvider::Whish(whish) => whish.create_collect(transaction),
        }
    }
}
