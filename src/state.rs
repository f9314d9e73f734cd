// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

use std::sync::Arc;

use crate::config::Settings;
use crate::providers::{
    DepositProvider, ManualPayout, PayPalClient, PayoutProvider, ProviderError, ProviderKind,
    TokenCache, WhishCollect,
};
use crate::storage::LedgerDb;

/// Shared application state: the ledger database, runtime settings and the
/// provider clients that were configured at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<LedgerDb>,
    pub settings: Arc<Settings>,
    pub paypal: Option<Arc<PayPalClient>>,
    pub whish: Option<Arc<WhishCollect>>,
}

impl AppState {
    pub fn new(db: LedgerDb, settings: Settings) -> Self {
        Self {
            db: Arc::new(db),
            settings: Arc::new(settings),
            paypal: None,
            whish: None,
        }
    }

    /// Build provider clients from the environment where configured.
    pub fn with_providers_from_env(mut self) -> Self {
        if PayPalClient::is_configured() {
            match PayPalClient::from_env(TokenCache::new()) {
                Ok(client) => self.paypal = Some(Arc::new(client)),
                Err(error) => {
                    tracing::warn!(%error, "PayPal configuration rejected; provider disabled")
                }
            }
        }
        if WhishCollect::is_configured() {
            match WhishCollect::from_env() {
                Ok(client) => self.whish = Some(Arc::new(client)),
                Err(error) => {
                    tracing::warn!(%error, "Whish configuration rejected; provider disabled")
                }
            }
        }
        self
    }

    /// Resolve a payout-capable provider for the given kind.
    pub fn payout_provider(&self, kind: ProviderKind) -> Result<PayoutProvider, ProviderError> {
        match kind {
            ProviderKind::Manual => Ok(PayoutProvider::Manual(ManualPayout)),
            ProviderKind::Paypal => self
                .paypal
                .clone()
                .map(PayoutProvider::Paypal)
                .ok_or_else(|| {
                    ProviderError::ConfigurationMissing(
                        "PayPal is not configured. Set PAYPAL_* environment variables.".to_string(),
                    )
                }),
            ProviderKind::Whish => Err(ProviderError::Unsupported(
                "whish does not process payouts".to_string(),
            )),
        }
    }

    /// Resolve a deposit-capable provider for the given kind.
    pub fn deposit_provider(&self, kind: ProviderKind) -> Result<DepositProvider, ProviderError> {
        match kind {
            ProviderKind::Paypal => self
                .paypal
                .clone()
                .map(DepositProvider::Paypal)
                .ok_or_else(|| {
                    ProviderError::ConfigurationMissing(
                        "PayPal is not configured. Set PAYPAL_* environment variables.".to_string(),
                    )
                }),
            ProviderKind::Whish => self
                .whish
                .clone()
                .map(DepositProvider::Whish)
                .ok_or_else(|| {
                    ProviderError::ConfigurationMissing(
                        "Whish is not configured. Set WHISH_* environment variables.".to_string(),
                    )
                }),
            ProviderKind::Manual => Err(ProviderError::Unsupported(
                "manual provider does not process deposits".to_string(),
            )),
        }
    }
}
