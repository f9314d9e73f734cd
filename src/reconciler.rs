// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! # Payout Reconciliation Sweep
//!
//! Background task that periodically polls provider status for payouts
//! stuck in `processing` and drives them to a terminal state when the
//! provider has already resolved them. This is the defense against
//! webhooks that never arrive: it converges through the exact same
//! transition functions as the webhook path
//! (`payouts::apply_provider_status`), so the two routes cannot disagree.
//!
//! ## Strategy
//!
//! Every `reconcile_interval` the sweeper:
//! 1. Lists `processing` payouts that hold a provider reference, oldest
//!    first, bounded by the configured batch limit.
//! 2. Calls `get_status` per payout and applies `paid`/`failed`; an
//!    `unknown` or still-`processing` answer changes nothing.
//!
//! The same sweep runs on demand from the admin trigger endpoint.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::payouts::apply_provider_status;
use crate::providers::ProviderKind;
use crate::state::AppState;
use crate::storage::PayoutStatus;

/// Summary of one reconciliation sweep.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct ReconcileOutcome {
    /// Payouts examined.
    pub scanned: usize,
    /// Driven to `paid`.
    pub paid: usize,
    /// Driven to `failed`.
    pub failed: usize,
    /// Left in `processing` (provider still working, or inconclusive).
    pub still_processing: usize,
    /// Status fetches that errored (logged, payout untouched).
    pub errors: usize,
}

/// Sweep `processing` payouts once, optionally restricted to one provider.
pub async fn reconcile_processing_payouts(
    state: &AppState,
    provider: Option<ProviderKind>,
    limit: usize,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    let payouts = match state.db.list_processing_payouts(provider, limit) {
        Ok(payouts) => payouts,
        Err(error) => {
            warn!(%error, "reconciliation could not list processing payouts");
            outcome.errors += 1;
            return outcome;
        }
    };

    for payout in payouts {
        outcome.scanned += 1;

        let resolved = match state.payout_provider(payout.provider) {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(payout_id = %payout.payout_id, %error, "no provider for payout");
                outcome.errors += 1;
                continue;
            }
        };

        let details = match resolved.get_status(&payout).await {
            Ok(details) => details,
            Err(error) => {
                warn!(
                    payout_id = %payout.payout_id,
                    %error,
                    "provider status fetch failed; will retry next sweep"
                );
                outcome.errors += 1;
                continue;
            }
        };

        match apply_provider_status(&state.db, &payout.payout_id, &details) {
            Ok(updated) => match updated.status {
                PayoutStatus::Paid => {
                    info!(payout_id = %payout.payout_id, "reconciled payout as paid");
                    outcome.paid += 1;
                }
                PayoutStatus::Failed => {
                    warn!(payout_id = %payout.payout_id, "reconciled payout as failed");
                    outcome.failed += 1;
                }
                _ => outcome.still_processing += 1,
            },
            Err(error) => {
                warn!(payout_id = %payout.payout_id, %error, "reconcile transition failed");
                outcome.errors += 1;
            }
        }
    }

    outcome
}

/// Background payout reconciler.
pub struct PayoutReconciler {
    state: AppState,
    interval: Duration,
    batch_limit: usize,
}

impl PayoutReconciler {
    pub fn new(state: AppState) -> Self {
        let interval = Duration::from_secs(state.settings.reconcile_interval_secs);
        let batch_limit = state.settings.reconcile_batch_limit;
        Self {
            state,
            interval,
            batch_limit,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(reconciler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_limit = self.batch_limit,
            "payout reconciler starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("payout reconciler shutting down");
                    return;
                }
            }

            let outcome =
                reconcile_processing_payouts(&self.state, None, self.batch_limit).await;
            if outcome.scanned > 0 {
                info!(
                    scanned = outcome.scanned,
                    paid = outcome.paid,
                    failed = outcome.failed,
                    still_processing = outcome.still_processing,
                    errors = outcome.errors,
                    "reconciliation sweep finished"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::storage::LedgerDb;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, AppState) {
        let temp = TempDir::new().unwrap();
        let db = LedgerDb::open(&temp.path().join("ledger.redb")).unwrap();
        (temp, AppState::new(db, Settings::for_tests()))
    }

    #[tokio::test]
    async fn empty_ledger_sweeps_cleanly() {
        let (_temp, state) = test_state();
        let outcome = reconcile_processing_payouts(&state, None, 50).await;
        assert_eq!(outcome.scanned, 0);
        assert_eq!(outcome.errors, 0);
    }

    #[tokio::test]
    async fn unconfigured_provider_counts_as_error_and_leaves_the_payout() {
        let (_temp, state) = test_state();
        state.db.credit("u1", 10).unwrap();
        let payout = crate::payouts::request_payout(
            &state.db,
            &state.settings,
            "u1",
            false,
            10,
            ProviderKind::Paypal,
            None,
        )
        .unwrap();
        crate::payouts::approve_payout(&state.db, &payout.payout_id, "admin").unwrap();
        crate::payouts::begin_execution(&state.db, &payout.payout_id).unwrap();
        crate::payouts::record_provider_reference(&state.db, &payout.payout_id, "BATCH-1")
            .unwrap();

        // No PayPal client configured in tests: the sweep records an error
        // and leaves the payout for the next run.
        let outcome = reconcile_processing_payouts(&state, Some(ProviderKind::Paypal), 50).await;
        assert_eq!(outcome.scanned, 1);
        assert_eq!(outcome.errors, 1);
        assert_eq!(
            state.db.payout(&payout.payout_id).unwrap().status,
            crate::storage::PayoutStatus::Processing
        );
    }

    #[tokio::test]
    async fn shutdown_token_stops_the_loop() {
        let (_temp, state) = test_state();
        let reconciler = PayoutReconciler::new(state);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        // Returns promptly because the token is already cancelled.
        reconciler.run(shutdown).await;
    }
}
