// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! # Webhook Processing
//!
//! Receivers persist every inbound callback verbatim before anything else
//! (see `api::webhooks`); this module is the dispatch that runs afterwards,
//! correlating the stored payload to a deposit or payout and driving the
//! matching engine's idempotent transitions. Because dispatch works from
//! the stored record, any event can be replayed after a crash or a
//! processing failure.

use serde_json::Value;
use tracing::warn;

use crate::deposits::{classify_whish_status, confirm_deposit, DepositError, DepositOutcome};
use crate::payouts::{apply_provider_status, mark_failed, mark_paid, record_provider_reference, PayoutError};
use crate::providers::paypal::{batch_id_from_resource, map_item_status, order_id_from_event};
use crate::providers::{ProviderKind, RemotePayoutStatus};
use crate::state::AppState;
use crate::storage::{LedgerError, WebhookEventRecord};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Payout(#[from] PayoutError),

    #[error(transparent)]
    Deposit(#[from] DepositError),
}

/// Run the provider-specific processing for a stored event. Safe to call
/// again on an already-processed event: every transition it can trigger is
/// idempotent.
pub async fn process_event(state: &AppState, event: &WebhookEventRecord) -> Result<(), WebhookError> {
    match event.provider {
        ProviderKind::Paypal => process_paypal_event(state, event).await,
        ProviderKind::Whish => process_whish_event(state, event),
        // The manual provider issues no webhooks; acknowledge and move on.
        ProviderKind::Manual => Ok(state.db.mark_webhook_processed(&event.event_id)?),
    }
}

/// Re-run processing from the stored payload (operator triage).
pub async fn replay_event(state: &AppState, event_id: &str) -> Result<WebhookEventRecord, WebhookError> {
    let event = state.db.webhook_event(event_id)?;
    match process_event(state, &event).await {
        Ok(()) => Ok(state.db.webhook_event(event_id)?),
        Err(error) => {
            state.db.record_webhook_error(event_id, &error.to_string())?;
            Err(error)
        }
    }
}

/// PayPal delivers deposit (checkout/capture) and payout (payouts-item)
/// events on the same endpoint; both are handled here.
async fn process_paypal_event(
    state: &AppState,
    event: &WebhookEventRecord,
) -> Result<(), WebhookError> {
    let event_type = event.event_type.as_str();
    let resource = event
        .payload
        .get("resource")
        .cloned()
        .unwrap_or(Value::Null);

    // -------- Deposits (Orders / Captures) --------
    if event_type.starts_with("CHECKOUT.ORDER.") || event_type.starts_with("PAYMENT.CAPTURE.") {
        if let Some(order_id) = order_id_from_event(event_type, &resource) {
            // Approval means the buyer finished checkout; capture
            // server-side so the COMPLETED event follows.
            if event_type == "CHECKOUT.ORDER.APPROVED" {
                if let Some(paypal) = state.paypal.as_deref() {
                    if let Err(error) = paypal.capture_order(&order_id).await {
                        warn!(order_id, %error, "order capture failed; reconciliation will retry");
                    }
                }
            }

            let reference = format!("paypal_order_{order_id}");
            let outcome = match event_type {
                "PAYMENT.CAPTURE.COMPLETED" | "CHECKOUT.ORDER.COMPLETED" => {
                    DepositOutcome::Success
                }
                "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.FAILED" => DepositOutcome::Failure,
                _ => {
                    // State-neutral event (created/approved/...): nothing to
                    // confirm, but the delivery is handled.
                    state.db.mark_webhook_processed(&event.event_id)?;
                    return Ok(());
                }
            };

            if confirm_deposit(&state.db, &reference, outcome, Some(&event.event_id))?.is_none() {
                state
                    .db
                    .record_webhook_error(&event.event_id, "unmatched_order_reference")?;
            }
            return Ok(());
        }
    }

    // -------- Payouts (one payout per batch) --------
    let Some(batch_id) = batch_id_from_resource(&resource) else {
        // Not a payout event we track; acknowledge.
        state.db.mark_webhook_processed(&event.event_id)?;
        return Ok(());
    };

    let Some(payout) = state
        .db
        .find_payout_by_provider_reference(ProviderKind::Paypal, &batch_id)?
    else {
        state.db.mark_webhook_processed(&event.event_id)?;
        return Ok(());
    };

    // The execution job may have stored only the sender batch id; adopt the
    // provider's batch id if the reference is still missing.
    record_provider_reference(&state.db, &payout.payout_id, &batch_id)?;

    if event_type.starts_with("PAYMENT.PAYOUTS-ITEM") || event_type.starts_with("PAYOUTS-ITEM") {
        let item_status = resource
            .get("transaction_status")
            .and_then(Value::as_str)
            .unwrap_or("");
        match map_item_status(item_status) {
            RemotePayoutStatus::Paid => {
                mark_paid(&state.db, &payout.payout_id)?;
            }
            RemotePayoutStatus::Failed => {
                mark_failed(
                    &state.db,
                    &payout.payout_id,
                    Some(&item_status.to_ascii_uppercase()),
                    Some(&format!(
                        "PayPal payout item {}",
                        item_status.to_ascii_lowercase()
                    )),
                )?;
            }
            // Unrecognized item status: leave the payout as it is.
            _ => {}
        }
    } else {
        // Unfamiliar payout event shape: reconcile directly against the
        // provider instead of guessing.
        let provider = state
            .payout_provider(ProviderKind::Paypal)
            .map_err(PayoutError::from)?;
        let details = provider
            .get_status(&payout)
            .await
            .map_err(PayoutError::from)?;
        apply_provider_status(&state.db, &payout.payout_id, &details)?;
    }

    state.db.mark_webhook_processed(&event.event_id)?;
    Ok(())
}

/// Whish callbacks carry a reference and a status string.
fn process_whish_event(state: &AppState, event: &WebhookEventRecord) -> Result<(), WebhookError> {
    let payload = &event.payload;
    let reference = payload
        .get("reference")
        .or_else(|| payload.get("ref"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let status = payload
        .get("status")
        .or_else(|| payload.get("result"))
        .and_then(Value::as_str)
        .unwrap_or("");

    if reference.is_empty() || status.is_empty() {
        state
            .db
            .record_webhook_error(&event.event_id, "missing_reference_or_status")?;
        return Ok(());
    }

    let outcome = classify_whish_status(status);
    if confirm_deposit(&state.db, reference, outcome, Some(&event.event_id))?.is_none() {
        state
            .db
            .record_webhook_error(&event.event_id, "unmatched_reference")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::storage::{
        LedgerDb, PayoutStatus, TransactionKind, TransactionRecord, TransactionStatus,
    };
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, AppState) {
        let temp = TempDir::new().unwrap();
        let db = LedgerDb::open(&temp.path().join("ledger.redb")).unwrap();
        (temp, AppState::new(db, Settings::for_tests()))
    }

    fn stored_event(state: &AppState, provider: ProviderKind, event_type: &str, payload: Value) -> WebhookEventRecord {
        let event = WebhookEventRecord::new(
            provider,
            event_type,
            "ext-1",
            BTreeMap::new(),
            payload,
        );
        state.db.insert_webhook_event(&event).unwrap();
        event
    }

    fn processing_paypal_payout(state: &AppState) -> crate::storage::PayoutRecord {
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
        crate::payouts::begin_execution(&state.db, &payout.payout_id)
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn whish_callback_confirms_the_deposit_and_flags_the_event() {
        let (_temp, state) = test_state();
        let purchase = TransactionRecord::new_pending(
            "u1",
            TransactionKind::CreditPurchase,
            10,
            0,
            Some("whish_collect_r1".to_string()),
        );
        state.db.insert_transaction(&purchase).unwrap();

        let event = stored_event(
            &state,
            ProviderKind::Whish,
            "callback",
            json!({"reference": "whish_collect_r1", "status": "success"}),
        );
        process_event(&state, &event).await.unwrap();

        assert_eq!(state.db.balance("u1").unwrap().available_credits, 10);
        assert!(state.db.webhook_event(&event.event_id).unwrap().processed);

        // Replay: second delivery of the same payload credits nothing.
        replay_event(&state, &event.event_id).await.unwrap();
        assert_eq!(state.db.balance("u1").unwrap().available_credits, 10);
    }

    #[tokio::test]
    async fn whish_callback_without_reference_is_recorded_for_triage() {
        let (_temp, state) = test_state();
        let event = stored_event(
            &state,
            ProviderKind::Whish,
            "callback",
            json!({"status": "success"}),
        );
        process_event(&state, &event).await.unwrap();

        let stored = state.db.webhook_event(&event.event_id).unwrap();
        assert!(!stored.processed);
        assert_eq!(
            stored.processing_error.as_deref(),
            Some("missing_reference_or_status")
        );
    }

    #[tokio::test]
    async fn paypal_payouts_item_success_marks_the_payout_paid() {
        let (_temp, state) = test_state();
        let payout = processing_paypal_payout(&state);
        crate::payouts::record_provider_reference(&state.db, &payout.payout_id, "BATCH-1")
            .unwrap();

        let event = stored_event(
            &state,
            ProviderKind::Paypal,
            "PAYMENT.PAYOUTS-ITEM.SUCCEEDED",
            json!({
                "event_type": "PAYMENT.PAYOUTS-ITEM.SUCCEEDED",
                "resource": {"payout_batch_id": "BATCH-1", "transaction_status": "SUCCESS"}
            }),
        );
        process_event(&state, &event).await.unwrap();

        let updated = state.db.payout(&payout.payout_id).unwrap();
        assert_eq!(updated.status, PayoutStatus::Paid);
        assert!(state.db.webhook_event(&event.event_id).unwrap().processed);
    }

    #[tokio::test]
    async fn paypal_payouts_item_failure_restores_the_requester() {
        let (_temp, state) = test_state();
        let payout = processing_paypal_payout(&state);

        // No provider_reference stored yet: the webhook correlates via the
        // idempotency key and adopts the batch id.
        let event = stored_event(
            &state,
            ProviderKind::Paypal,
            "PAYMENT.PAYOUTS-ITEM.DENIED",
            json!({
                "resource": {
                    "payout_batch_id": payout.idempotency_key,
                    "transaction_status": "DENIED"
                }
            }),
        );
        process_event(&state, &event).await.unwrap();

        let updated = state.db.payout(&payout.payout_id).unwrap();
        assert_eq!(updated.status, PayoutStatus::Failed);
        assert_eq!(
            updated.provider_reference.as_deref(),
            Some(payout.idempotency_key.as_str())
        );
        assert_eq!(state.db.balance("u1").unwrap().available_credits, 10);
    }

    #[tokio::test]
    async fn unrecognized_item_status_leaves_the_payout_processing() {
        let (_temp, state) = test_state();
        let payout = processing_paypal_payout(&state);
        crate::payouts::record_provider_reference(&state.db, &payout.payout_id, "BATCH-2")
            .unwrap();

        let event = stored_event(
            &state,
            ProviderKind::Paypal,
            "PAYMENT.PAYOUTS-ITEM.ONHOLD",
            json!({
                "resource": {"payout_batch_id": "BATCH-2", "transaction_status": "ONHOLD"}
            }),
        );
        process_event(&state, &event).await.unwrap();

        let updated = state.db.payout(&payout.payout_id).unwrap();
        assert_eq!(updated.status, PayoutStatus::Processing);
    }

    #[tokio::test]
    async fn paypal_capture_completed_credits_the_purchase() {
        let (_temp, state) = test_state();
        let purchase = TransactionRecord::new_pending(
            "u1",
            TransactionKind::CreditPurchase,
            25,
            0,
            Some("paypal_order_ORDER-9".to_string()),
        );
        state.db.insert_transaction(&purchase).unwrap();

        let event = stored_event(
            &state,
            ProviderKind::Paypal,
            "PAYMENT.CAPTURE.COMPLETED",
            json!({
                "resource": {
                    "supplementary_data": {"related_ids": {"order_id": "ORDER-9"}}
                }
            }),
        );
        process_event(&state, &event).await.unwrap();

        assert_eq!(state.db.balance("u1").unwrap().available_credits, 25);
        let tx = state.db.transaction(&purchase.transaction_id).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn unmatched_batch_is_acknowledged_without_state_change() {
        let (_temp, state) = test_state();
        let event = stored_event(
            &state,
            ProviderKind::Paypal,
            "PAYMENT.PAYOUTS-ITEM.SUCCEEDED",
            json!({"resource": {"payout_batch_id": "UNKNOWN", "transaction_status": "SUCCESS"}}),
        );
        process_event(&state, &event).await.unwrap();
        assert!(state.db.webhook_event(&event.event_id).unwrap().processed);
    }
}
