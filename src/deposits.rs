// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! # Deposit Confirmation Engine
//!
//! Buying credits: a pending `credit_purchase` ledger entry records the
//! credits to grant (not currency units), the provider issues a
//! collect/approval URL, and the wallet is credited ONLY when a webhook or
//! reconciliation confirms the payment. [`confirm_deposit`] is idempotent
//! and re-entrant: crediting, the status flip and the webhook-event flag
//! commit in one write transaction, so a replayed callback can never
//! double-credit.

use tracing::info;

use crate::providers::{DepositContext, ProviderError, ProviderKind};
use crate::state::AppState;
use crate::storage::balance::credit_in;
use crate::storage::ledger_db::{
    put_json, LedgerError, BALANCES, TRANSACTIONS, TX_BY_REFERENCE, WEBHOOK_EVENTS,
};
use crate::storage::transactions::{find_by_reference_in, insert_transaction_in, reindex_reference_in};
use crate::storage::webhooks::mark_event_processed_in;
use crate::storage::{
    LedgerDb, TransactionKind, TransactionRecord, TransactionStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum DepositError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// What a provider status string means for a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositOutcome {
    Success,
    Failure,
    Unknown,
}

/// PayPal order/capture vocabulary.
pub fn classify_paypal_status(raw_status: &str) -> DepositOutcome {
    match raw_status.trim().to_ascii_lowercase().as_str() {
        "completed" | "success" => DepositOutcome::Success,
        "failed" | "denied" | "canceled" | "cancelled" | "declined" => DepositOutcome::Failure,
        _ => DepositOutcome::Unknown,
    }
}

/// Whish collect vocabulary.
pub fn classify_whish_status(raw_status: &str) -> DepositOutcome {
    match raw_status.trim().to_ascii_lowercase().as_str() {
        "success" | "completed" | "paid" | "approved" => DepositOutcome::Success,
        "failed" | "cancelled" | "canceled" | "error" | "declined" => DepositOutcome::Failure,
        _ => DepositOutcome::Unknown,
    }
}

/// Client-facing result of starting a deposit flow.
#[derive(Debug, Clone)]
pub struct DepositFlow {
    pub transaction_id: String,
    pub reference: String,
    pub collect_url: String,
    pub provider_reference: String,
}

fn ensure_positive_credits(credits: u64) -> Result<(), DepositError> {
    if credits == 0 {
        return Err(LedgerError::InvalidAmount("credits must be positive".to_string()).into());
    }
    Ok(())
}

/// Create a PayPal checkout order for buying credits. Credits are granted
/// only after webhook-confirmed capture.
pub async fn create_paypal_order(
    state: &AppState,
    user_id: &str,
    credits: u64,
    context: DepositContext,
) -> Result<DepositFlow, DepositError> {
    ensure_positive_credits(credits)?;
    let provider = state.deposit_provider(ProviderKind::Paypal)?;

    // Temporary reference until the provider assigns the order id.
    let pending = TransactionRecord::new_pending(
        user_id,
        TransactionKind::CreditPurchase,
        credits,
        0,
        Some(format!("paypal_tmp_{}", uuid::Uuid::new_v4())),
    );
    state.db.insert_transaction(&pending)?;

    let created = provider.create_deposit(&pending, &context).await?;
    if created.provider_reference.is_empty() {
        return Err(ProviderError::ResponseMalformed("order id missing".to_string()).into());
    }

    // Store the order id as the reference so the webhook can locate the
    // transaction by it.
    let reference = format!("paypal_order_{}", created.provider_reference);
    let write_txn = state.db.begin_write().map_err(LedgerError::from)?;
    {
        let mut tx_table = write_txn.open_table(TRANSACTIONS).map_err(LedgerError::from)?;
        let mut ref_table = write_txn
            .open_table(TX_BY_REFERENCE)
            .map_err(LedgerError::from)?;
        reindex_reference_in(&mut tx_table, &mut ref_table, &pending.transaction_id, &reference)?;
    }
    write_txn.commit().map_err(LedgerError::from)?;

    info!(
        transaction_id = %pending.transaction_id,
        order_id = %created.provider_reference,
        credits,
        "paypal deposit order created"
    );

    Ok(DepositFlow {
        transaction_id: pending.transaction_id,
        reference,
        collect_url: created.collect_url,
        provider_reference: created.provider_reference,
    })
}

/// Create a Whish collect flow for buying credits.
pub async fn create_whish_collect(
    state: &AppState,
    user_id: &str,
    credits: u64,
) -> Result<DepositFlow, DepositError> {
    ensure_positive_credits(credits)?;
    let provider = state.deposit_provider(ProviderKind::Whish)?;

    let reference = format!("whish_collect_{}", uuid::Uuid::new_v4());
    let pending = TransactionRecord::new_pending(
        user_id,
        TransactionKind::CreditPurchase,
        credits,
        0,
        Some(reference.clone()),
    );
    state.db.insert_transaction(&pending)?;

    let created = provider.create_deposit(&pending, &DepositContext::default()).await?;

    info!(
        transaction_id = %pending.transaction_id,
        reference = %reference,
        credits,
        "whish collect created"
    );

    Ok(DepositFlow {
        transaction_id: pending.transaction_id,
        reference,
        collect_url: created.collect_url,
        provider_reference: created.provider_reference,
    })
}

/// Confirm a deposit by reference.
///
/// - already `completed`: flag the webhook event and return (duplicate
///   delivery is a no-op);
/// - failure vocabulary: mark the purchase `failed`;
/// - success vocabulary: credit the wallet with the recorded credits and
///   mark `completed`, atomically;
/// - unknown vocabulary: leave `pending` for reconciliation, and leave the
///   event unprocessed so it stays visible for triage.
///
/// Returns `None` when no transaction carries the reference.
pub fn confirm_deposit(
    db: &LedgerDb,
    reference: &str,
    outcome: DepositOutcome,
    event_id: Option<&str>,
) -> Result<Option<TransactionRecord>, DepositError> {
    let write_txn = db.begin_write().map_err(LedgerError::from)?;
    let confirmed = {
        let mut balances = write_txn.open_table(BALANCES).map_err(LedgerError::from)?;
        let mut tx_table = write_txn.open_table(TRANSACTIONS).map_err(LedgerError::from)?;
        let ref_table = write_txn
            .open_table(TX_BY_REFERENCE)
            .map_err(LedgerError::from)?;
        let mut events = write_txn
            .open_table(WEBHOOK_EVENTS)
            .map_err(LedgerError::from)?;

        let Some(mut record) = find_by_reference_in(&ref_table, &tx_table, reference)? else {
            return Ok(None);
        };

        let mut flag_event = || -> Result<(), LedgerError> {
            if let Some(event_id) = event_id {
                mark_event_processed_in(&mut events, event_id)?;
            }
            Ok(())
        };

        match (record.status, outcome) {
            (TransactionStatus::Completed, _) => {
                // Credited on a previous delivery; just acknowledge.
                flag_event()?;
                record
            }
            (TransactionStatus::Pending, DepositOutcome::Failure) => {
                record.status = TransactionStatus::Failed;
                record.updated_at = chrono::Utc::now();
                put_json(&mut tx_table, &record.transaction_id.clone(), &record)?;
                flag_event()?;
                record
            }
            (TransactionStatus::Pending, DepositOutcome::Success) => {
                credit_in(&mut balances, &record.user_id, record.amount)?;
                record.status = TransactionStatus::Completed;
                record.updated_at = chrono::Utc::now();
                put_json(&mut tx_table, &record.transaction_id.clone(), &record)?;
                flag_event()?;
                info!(
                    transaction_id = %record.transaction_id,
                    user_id = %record.user_id,
                    credits = record.amount,
                    "deposit confirmed, wallet credited"
                );
                record
            }
            // Unknown status, or a stray signal for an already-failed
            // purchase: change nothing and let reconciliation decide.
            _ => record,
        }
    };
    write_txn.commit().map_err(LedgerError::from)?;
    Ok(Some(confirmed))
}
