// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! # Payout Lifecycle Engine
//!
//! Drives a payout through `pending → approved → processing → {paid |
//! failed}`, with `pending/approved → rejected` as the admin's side exit.
//!
//! Every transition is one write transaction updating the payout, its
//! cashout ledger entry and the affected balances together, so the records
//! can never disagree. The `processing` transition commits and releases
//! before the provider network call is made; a second concurrent execution
//! attempt observes `processing` and no-ops. The webhook path and the
//! reconciliation sweep both converge through [`mark_paid`] /
//! [`mark_failed`], and a `paid` payout is never downgraded.

use tracing::{error, info, warn};

use crate::config::{payout_fee, Settings};
use crate::providers::{CreatedPayout, ProviderError, ProviderKind};
use crate::state::AppState;
use crate::storage::balance::{consume_locked_in, credit_in, lock_in, unlock_in};
use crate::storage::ledger_db::{BlobTable, LedgerError, BALANCES, PAYOUTS, TRANSACTIONS, TX_BY_REFERENCE};
use crate::storage::payouts::{get_payout_in, put_payout_in};
use crate::storage::transactions::{find_by_reference_in, finish_transaction_in, insert_transaction_in};
use crate::storage::{
    LedgerDb, MethodCipher, PayoutRecord, PayoutStatus, TransactionKind, TransactionRecord,
    TransactionStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum PayoutError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("manual payouts are completed by admin mark-paid, not automated execution")]
    ManualExecution,
}

fn transition_error(from: PayoutStatus, to: &str) -> PayoutError {
    PayoutError::Ledger(LedgerError::InvalidStatusTransition {
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Mark the payout's cashout ledger entry terminal, if it is still pending.
fn finish_cashout_in(
    tx_table: &mut BlobTable<'_>,
    ref_table: &redb::Table<'_, &'static str, &'static str>,
    payout: &PayoutRecord,
    status: TransactionStatus,
) -> Result<(), LedgerError> {
    let reference = payout.transaction_reference();
    if let Some(entry) = find_by_reference_in(ref_table, &*tx_table, &reference)? {
        finish_transaction_in(tx_table, &entry.transaction_id, status)?;
    }
    Ok(())
}

/// Create a payout request: validates the amount, locks the gross credits
/// and files the pending cashout ledger entry, all in one transaction.
pub fn request_payout(
    db: &LedgerDb,
    settings: &Settings,
    user_id: &str,
    is_admin: bool,
    gross_amount: u64,
    provider: ProviderKind,
    method_id: Option<String>,
) -> Result<PayoutRecord, PayoutError> {
    if !provider.supports_payouts() {
        return Err(ProviderError::Unsupported(format!(
            "{provider} does not process payouts"
        ))
        .into());
    }
    if gross_amount < settings.min_cashout_credits {
        return Err(LedgerError::InvalidAmount(format!(
            "minimum cashout is {} credits",
            settings.min_cashout_credits
        ))
        .into());
    }

    let fee_amount = payout_fee(gross_amount, settings.fee_bps_for(is_admin));
    if gross_amount <= fee_amount {
        return Err(
            LedgerError::InvalidAmount("net amount after fees must be positive".to_string()).into(),
        );
    }

    let mut record = PayoutRecord::new_pending(user_id, gross_amount, fee_amount, provider, method_id);
    let cashout = TransactionRecord::new_pending(
        user_id,
        TransactionKind::Cashout,
        gross_amount,
        fee_amount,
        Some(record.transaction_reference()),
    );

    let write_txn = db.begin_write()?;
    {
        let mut balances = write_txn.open_table(BALANCES).map_err(LedgerError::from)?;
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut tx_table = write_txn.open_table(TRANSACTIONS).map_err(LedgerError::from)?;
        let mut ref_table = write_txn.open_table(TX_BY_REFERENCE).map_err(LedgerError::from)?;

        lock_in(&mut balances, user_id, gross_amount)?;
        insert_transaction_in(&mut tx_table, &mut ref_table, &cashout)?;
        put_payout_in(&mut payouts, &mut record)?;
    }
    write_txn.commit().map_err(LedgerError::from)?;

    info!(
        payout_id = %record.payout_id,
        user_id,
        gross = gross_amount,
        fee = fee_amount,
        net = record.net_amount,
        %provider,
        "payout requested"
    );
    Ok(record)
}

/// Approve a pending payout: the locked gross is consumed permanently and
/// the platform fee lands in the approving admin's balance.
///
/// Asynchronous provider execution is the caller's next step for automated
/// providers; approval itself never touches the network.
pub fn approve_payout(
    db: &LedgerDb,
    payout_id: &str,
    admin_user_id: &str,
) -> Result<PayoutRecord, PayoutError> {
    let write_txn = db.begin_write()?;
    let record = {
        let mut balances = write_txn.open_table(BALANCES).map_err(LedgerError::from)?;
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut tx_table = write_txn.open_table(TRANSACTIONS).map_err(LedgerError::from)?;
        let mut ref_table = write_txn.open_table(TX_BY_REFERENCE).map_err(LedgerError::from)?;

        let mut record = get_payout_in(&payouts, payout_id)?;
        if record.status != PayoutStatus::Pending {
            return Err(transition_error(record.status, "approved"));
        }

        consume_locked_in(&mut balances, &record.user_id, record.gross_amount)?;

        record.status = PayoutStatus::Approved;
        record.approved_by = Some(admin_user_id.to_string());
        record.approved_at = Some(chrono::Utc::now());
        if record.idempotency_key.is_empty() {
            record.idempotency_key = uuid::Uuid::new_v4().to_string();
        }

        if record.fee_amount > 0 {
            credit_in(&mut balances, admin_user_id, record.fee_amount)?;
            let earning = TransactionRecord::new_completed(
                admin_user_id,
                TransactionKind::SkillEarning,
                record.fee_amount,
                0,
                Some(record.fee_reference()),
            );
            insert_transaction_in(&mut tx_table, &mut ref_table, &earning)?;
        }

        put_payout_in(&mut payouts, &mut record)?;
        record
    };
    write_txn.commit().map_err(LedgerError::from)?;

    info!(payout_id, approved_by = admin_user_id, "payout approved");
    Ok(record)
}

/// Reject a payout and make the requester whole: a still-pending payout
/// has its reservation unlocked; an approved one (whose lock was already
/// consumed) is re-credited. Idempotent if already rejected.
pub fn reject_payout(
    db: &LedgerDb,
    payout_id: &str,
    admin_note: &str,
) -> Result<PayoutRecord, PayoutError> {
    let write_txn = db.begin_write()?;
    let record = {
        let mut balances = write_txn.open_table(BALANCES).map_err(LedgerError::from)?;
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut tx_table = write_txn.open_table(TRANSACTIONS).map_err(LedgerError::from)?;
        let ref_table = write_txn.open_table(TX_BY_REFERENCE).map_err(LedgerError::from)?;

        let mut record = get_payout_in(&payouts, payout_id)?;
        match record.status {
            PayoutStatus::Rejected => return Ok(record),
            PayoutStatus::Pending => {
                unlock_in(&mut balances, &record.user_id, record.gross_amount)?;
            }
            PayoutStatus::Approved => {
                credit_in(&mut balances, &record.user_id, record.gross_amount)?;
            }
            other => return Err(transition_error(other, "rejected")),
        }

        record.status = PayoutStatus::Rejected;
        record.admin_note = Some(admin_note.to_string());
        record.processed_at = Some(chrono::Utc::now());
        finish_cashout_in(&mut tx_table, &ref_table, &record, TransactionStatus::Failed)?;
        put_payout_in(&mut payouts, &mut record)?;
        record
    };
    write_txn.commit().map_err(LedgerError::from)?;

    info!(payout_id, "payout rejected");
    Ok(record)
}

/// Terminal success transition, shared by the webhook path, the
/// reconciliation sweep and the admin's manual completion. A no-op when
/// already `paid`.
pub fn mark_paid(db: &LedgerDb, payout_id: &str) -> Result<PayoutRecord, PayoutError> {
    let write_txn = db.begin_write()?;
    let record = {
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut tx_table = write_txn.open_table(TRANSACTIONS).map_err(LedgerError::from)?;
        let ref_table = write_txn.open_table(TX_BY_REFERENCE).map_err(LedgerError::from)?;

        let mut record = get_payout_in(&payouts, payout_id)?;
        match record.status {
            PayoutStatus::Paid => return Ok(record),
            PayoutStatus::Approved | PayoutStatus::Processing => {}
            other => return Err(transition_error(other, "paid")),
        }

        record.status = PayoutStatus::Paid;
        record.processed_at = Some(chrono::Utc::now());
        record.failure_code = None;
        record.failure_message = None;
        finish_cashout_in(&mut tx_table, &ref_table, &record, TransactionStatus::Completed)?;
        put_payout_in(&mut payouts, &mut record)?;
        record
    };
    write_txn.commit().map_err(LedgerError::from)?;

    info!(payout_id, "payout paid");
    Ok(record)
}

/// Terminal failure transition, shared by the webhook path, the
/// reconciliation sweep and execution error handling. Restores the gross
/// amount to the requester. A `paid` payout is never downgraded, and a
/// repeated failure never restores twice.
pub fn mark_failed(
    db: &LedgerDb,
    payout_id: &str,
    failure_code: Option<&str>,
    failure_message: Option<&str>,
) -> Result<PayoutRecord, PayoutError> {
    let write_txn = db.begin_write()?;
    let record = {
        let mut balances = write_txn.open_table(BALANCES).map_err(LedgerError::from)?;
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut tx_table = write_txn.open_table(TRANSACTIONS).map_err(LedgerError::from)?;
        let ref_table = write_txn.open_table(TX_BY_REFERENCE).map_err(LedgerError::from)?;

        let mut record = get_payout_in(&payouts, payout_id)?;
        match record.status {
            PayoutStatus::Paid => {
                warn!(payout_id, "refusing to downgrade a paid payout to failed");
                return Ok(record);
            }
            PayoutStatus::Failed | PayoutStatus::Rejected => return Ok(record),
            PayoutStatus::Pending => {
                unlock_in(&mut balances, &record.user_id, record.gross_amount)?;
            }
            PayoutStatus::Approved | PayoutStatus::Processing => {
                credit_in(&mut balances, &record.user_id, record.gross_amount)?;
            }
        }

        record.status = PayoutStatus::Failed;
        record.processed_at = Some(chrono::Utc::now());
        record.failure_code = failure_code.map(str::to_string);
        record.failure_message = failure_message.map(str::to_string);
        finish_cashout_in(&mut tx_table, &ref_table, &record, TransactionStatus::Failed)?;
        put_payout_in(&mut payouts, &mut record)?;
        record
    };
    write_txn.commit().map_err(LedgerError::from)?;

    warn!(payout_id, ?failure_code, "payout failed");
    Ok(record)
}

/// Claim an approved payout for execution by committing the `processing`
/// status. Returns `None` when another worker already claimed it (or it is
/// already terminal) — the idempotency that makes retried execution safe.
pub fn begin_execution(db: &LedgerDb, payout_id: &str) -> Result<Option<PayoutRecord>, PayoutError> {
    let write_txn = db.begin_write()?;
    let record = {
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut record = get_payout_in(&payouts, payout_id)?;

        match record.status {
            PayoutStatus::Processing | PayoutStatus::Paid | PayoutStatus::Failed => {
                return Ok(None);
            }
            PayoutStatus::Approved => {}
            other => return Err(transition_error(other, "processing")),
        }

        // Manual payouts never execute through a provider; the admin marks
        // them paid directly.
        if record.provider == ProviderKind::Manual {
            return Err(PayoutError::ManualExecution);
        }

        if record.idempotency_key.is_empty() {
            record.idempotency_key = uuid::Uuid::new_v4().to_string();
        }
        record.status = PayoutStatus::Processing;
        put_payout_in(&mut payouts, &mut record)?;
        record
    };
    write_txn.commit().map_err(LedgerError::from)?;
    Ok(Some(record))
}

/// Fill the payout's routing snapshot from the user's saved method for the
/// provider (the chosen one, or the default). Fatal when no usable method
/// exists.
pub fn hydrate_method_details(
    db: &LedgerDb,
    cipher: Option<&MethodCipher>,
    payout: &PayoutRecord,
) -> Result<PayoutRecord, PayoutError> {
    if payout.provider != ProviderKind::Paypal {
        return Ok(payout.clone());
    }
    let already_hydrated = payout
        .method_details
        .as_ref()
        .and_then(|details| details.get("receiver"))
        .and_then(serde_json::Value::as_str)
        .is_some_and(|receiver| !receiver.is_empty());
    if already_hydrated {
        return Ok(payout.clone());
    }

    let method = match payout.method_id.as_deref() {
        Some(method_id) => {
            let method = db.payout_method(method_id).map_err(|_| {
                ProviderError::ConfigurationMissing(format!(
                    "payout method {method_id} does not exist"
                ))
            })?;
            if method.user_id != payout.user_id || method.provider != payout.provider {
                return Err(ProviderError::ConfigurationMissing(format!(
                    "payout method {method_id} does not belong to this payout"
                ))
                .into());
            }
            method
        }
        None => db
            .default_payout_method(&payout.user_id, payout.provider)?
            .ok_or_else(|| {
                ProviderError::ConfigurationMissing(
                    "no default PayPal payout method configured for user".to_string(),
                )
            })?,
    };

    let cipher = cipher.ok_or_else(|| {
        ProviderError::ConfigurationMissing("METHOD_DETAILS_KEY is not configured".to_string())
    })?;
    let details = cipher.open(&method.details_encrypted).map_err(|_| {
        ProviderError::ConfigurationMissing("payout method details are unreadable".to_string())
    })?;
    let receiver = details
        .get("receiver")
        .or_else(|| details.get("email"))
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProviderError::ConfigurationMissing("invalid PayPal payout method details".to_string())
        })?
        .to_string();

    let write_txn = db.begin_write()?;
    let record = {
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut record = get_payout_in(&payouts, &payout.payout_id)?;
        if record.method.is_none() {
            record.method = Some(if method.method.is_empty() {
                "paypal_email".to_string()
            } else {
                method.method.clone()
            });
        }
        record.method_details = Some(serde_json::json!({ "receiver": receiver }));
        put_payout_in(&mut payouts, &mut record)?;
        record
    };
    write_txn.commit().map_err(LedgerError::from)?;
    Ok(record)
}

/// Store the provider's reference, keeping an existing one (a concurrent
/// execution or an early webhook may have written it first).
pub fn record_provider_reference(
    db: &LedgerDb,
    payout_id: &str,
    provider_reference: &str,
) -> Result<PayoutRecord, PayoutError> {
    let write_txn = db.begin_write()?;
    let record = {
        let mut payouts = write_txn.open_table(PAYOUTS).map_err(LedgerError::from)?;
        let mut record = get_payout_in(&payouts, payout_id)?;
        let missing = record
            .provider_reference
            .as_deref()
            .is_none_or(str::is_empty);
        if missing && !provider_reference.is_empty() {
            record.provider_reference = Some(provider_reference.to_string());
            put_payout_in(&mut payouts, &mut record)?;
        }
        record
    };
    write_txn.commit().map_err(LedgerError::from)?;
    Ok(record)
}

/// Apply a provider-reported status to a payout.
///
/// The single convergence point for BOTH the webhook path and the
/// reconciliation sweep, so the two routes can never produce divergent
/// outcomes: `paid`/`failed` run the terminal transitions, anything
/// `processing` or `unknown` changes nothing.
pub fn apply_provider_status(
    db: &LedgerDb,
    payout_id: &str,
    details: &crate::providers::PayoutStatusDetails,
) -> Result<PayoutRecord, PayoutError> {
    use crate::providers::RemotePayoutStatus;
    match details.status {
        RemotePayoutStatus::Paid => mark_paid(db, payout_id),
        RemotePayoutStatus::Failed => mark_failed(
            db,
            payout_id,
            details.failure_code.as_deref(),
            details.failure_message.as_deref(),
        ),
        RemotePayoutStatus::Processing | RemotePayoutStatus::Unknown => {
            Ok(db.payout(payout_id)?)
        }
    }
}

/// Background execution of an approved payout.
///
/// Claims the payout (committing `processing` so no transaction spans the
/// network call), hydrates routing details, submits to the provider with
/// the stable idempotency key, and stores the returned reference. Any
/// failure drives the payout to `failed` (restoring the requester's
/// credits) and is then re-raised so the caller's retry policy can see it.
pub async fn execute_approved_payout(state: &AppState, payout_id: &str) -> Result<(), PayoutError> {
    let Some(claimed) = begin_execution(&state.db, payout_id)? else {
        return Ok(());
    };

    let submitted: Result<CreatedPayout, PayoutError> = async {
        let hydrated = hydrate_method_details(
            &state.db,
            state.settings.method_cipher.as_deref(),
            &claimed,
        )?;
        let provider = state.payout_provider(hydrated.provider)?;
        Ok(provider.create_payout(&hydrated).await?)
    }
    .await;

    match submitted {
        Ok(created) => {
            record_provider_reference(&state.db, payout_id, &created.provider_reference)?;
            info!(
                payout_id,
                provider_reference = %created.provider_reference,
                "payout submitted to provider"
            );
            Ok(())
        }
        Err(error) => {
            error!(payout_id, %error, "payout execution failed");
            mark_failed(
                &state.db,
                payout_id,
                Some("provider_error"),
                Some(&error.to_string()),
            )?;
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PayoutMethodRecord;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LedgerDb, Settings) {
        let temp = TempDir::new().unwrap();
        let db = LedgerDb::open(&temp.path().join("ledger.redb")).unwrap();
        (temp, db, Settings::for_tests())
    }

    fn cashout_status(db: &LedgerDb, payout: &PayoutRecord) -> TransactionStatus {
        db.find_transaction_by_reference(&payout.transaction_reference())
            .unwrap()
            .expect("cashout entry exists")
            .status
    }

    #[test]
    fn request_locks_gross_and_computes_fee_breakdown() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();

        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();

        assert_eq!(payout.gross_amount, 10);
        assert_eq!(payout.fee_amount, 2);
        assert_eq!(payout.net_amount, 8);
        assert_eq!(payout.status, PayoutStatus::Pending);
        assert!(!payout.idempotency_key.is_empty());

        let balance = db.balance("u1").unwrap();
        assert_eq!(balance.available_credits, 0);
        assert_eq!(balance.locked_credits, 10);
        assert_eq!(cashout_status(&db, &payout), TransactionStatus::Pending);
    }

    #[test]
    fn request_below_minimum_or_beyond_balance_has_no_effect() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();

        assert!(matches!(
            request_payout(&db, &settings, "u1", false, 4, ProviderKind::Paypal, None),
            Err(PayoutError::Ledger(LedgerError::InvalidAmount(_)))
        ));
        assert!(matches!(
            request_payout(&db, &settings, "u1", false, 11, ProviderKind::Paypal, None),
            Err(PayoutError::Ledger(LedgerError::InsufficientFunds))
        ));
        assert!(matches!(
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Whish, None),
            Err(PayoutError::Provider(ProviderError::Unsupported(_)))
        ));

        let balance = db.balance("u1").unwrap();
        assert_eq!(balance.available_credits, 10);
        assert_eq!(balance.locked_credits, 0);
        assert!(db.list_payouts_for_user("u1").unwrap().is_empty());
    }

    #[test]
    fn admin_requests_carry_no_fee() {
        let (_temp, db, settings) = setup();
        db.credit("admin", 10).unwrap();

        let payout =
            request_payout(&db, &settings, "admin", true, 10, ProviderKind::Paypal, None).unwrap();
        assert_eq!(payout.fee_amount, 0);
        assert_eq!(payout.net_amount, 10);
    }

    #[test]
    fn approval_consumes_lock_and_pays_the_fee_to_the_admin() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();

        let approved = approve_payout(&db, &payout.payout_id, "admin").unwrap();
        assert_eq!(approved.status, PayoutStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("admin"));
        assert!(approved.approved_at.is_some());

        let requester = db.balance("u1").unwrap();
        assert_eq!(requester.available_credits, 0);
        assert_eq!(requester.locked_credits, 0);
        assert_eq!(db.balance("admin").unwrap().available_credits, 2);

        let earning = db
            .find_transaction_by_reference(&payout.fee_reference())
            .unwrap()
            .expect("fee earning recorded");
        assert_eq!(earning.kind, TransactionKind::SkillEarning);
        assert_eq!(earning.amount, 2);
        assert_eq!(earning.status, TransactionStatus::Completed);

        // A second approval must be refused.
        assert!(matches!(
            approve_payout(&db, &payout.payout_id, "admin"),
            Err(PayoutError::Ledger(LedgerError::InvalidStatusTransition { .. }))
        ));
    }

    #[test]
    fn rejecting_a_pending_payout_restores_the_balance_exactly() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();

        let rejected = reject_payout(&db, &payout.payout_id, "docs missing").unwrap();
        assert_eq!(rejected.status, PayoutStatus::Rejected);
        assert_eq!(rejected.admin_note.as_deref(), Some("docs missing"));

        let balance = db.balance("u1").unwrap();
        assert_eq!(balance.available_credits, 10);
        assert_eq!(balance.locked_credits, 0);
        assert_eq!(cashout_status(&db, &payout), TransactionStatus::Failed);

        // Idempotent: a repeat rejection does not restore twice.
        reject_payout(&db, &payout.payout_id, "again").unwrap();
        assert_eq!(db.balance("u1").unwrap().available_credits, 10);
    }

    #[test]
    fn rejecting_after_approval_recredits_the_consumed_gross() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        approve_payout(&db, &payout.payout_id, "admin").unwrap();

        reject_payout(&db, &payout.payout_id, "changed my mind").unwrap();
        let balance = db.balance("u1").unwrap();
        assert_eq!(balance.available_credits, 10);
        assert_eq!(balance.locked_credits, 0);
    }

    #[test]
    fn execution_claim_is_idempotent_and_refuses_manual() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 20).unwrap();

        let paypal =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        approve_payout(&db, &paypal.payout_id, "admin").unwrap();

        let claimed = begin_execution(&db, &paypal.payout_id)
            .unwrap()
            .expect("first claim wins");
        assert_eq!(claimed.status, PayoutStatus::Processing);

        // A concurrent worker observes processing and no-ops.
        assert!(begin_execution(&db, &paypal.payout_id).unwrap().is_none());

        let manual =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Manual, None).unwrap();
        approve_payout(&db, &manual.payout_id, "admin").unwrap();
        assert!(matches!(
            begin_execution(&db, &manual.payout_id),
            Err(PayoutError::ManualExecution)
        ));

        // Unapproved payouts cannot be claimed.
        db.credit("u2", 10).unwrap();
        let pending =
            request_payout(&db, &settings, "u2", false, 10, ProviderKind::Paypal, None).unwrap();
        assert!(matches!(
            begin_execution(&db, &pending.payout_id),
            Err(PayoutError::Ledger(LedgerError::InvalidStatusTransition { .. }))
        ));
    }

    #[test]
    fn provider_reference_is_kept_once_set() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        approve_payout(&db, &payout.payout_id, "admin").unwrap();
        begin_execution(&db, &payout.payout_id).unwrap();

        let first = record_provider_reference(&db, &payout.payout_id, "batch-1").unwrap();
        assert_eq!(first.provider_reference.as_deref(), Some("batch-1"));

        let second = record_provider_reference(&db, &payout.payout_id, "batch-2").unwrap();
        assert_eq!(second.provider_reference.as_deref(), Some("batch-1"));
    }

    #[test]
    fn happy_path_ends_paid_with_completed_cashout() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        approve_payout(&db, &payout.payout_id, "admin").unwrap();
        begin_execution(&db, &payout.payout_id).unwrap();
        record_provider_reference(&db, &payout.payout_id, "X").unwrap();

        let paid = mark_paid(&db, &payout.payout_id).unwrap();
        assert_eq!(paid.status, PayoutStatus::Paid);
        assert!(paid.processed_at.is_some());
        assert_eq!(cashout_status(&db, &payout), TransactionStatus::Completed);

        // Webhook and sweep may both confirm; the repeat is a no-op.
        let again = mark_paid(&db, &payout.payout_id).unwrap();
        assert_eq!(again.status, PayoutStatus::Paid);
    }

    #[test]
    fn provider_failure_restores_the_requester_and_fails_the_cashout() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        approve_payout(&db, &payout.payout_id, "admin").unwrap();
        begin_execution(&db, &payout.payout_id).unwrap();

        let failed = mark_failed(&db, &payout.payout_id, Some("DENIED"), Some("batch denied"))
            .unwrap();
        assert_eq!(failed.status, PayoutStatus::Failed);
        assert_eq!(failed.failure_code.as_deref(), Some("DENIED"));

        let balance = db.balance("u1").unwrap();
        assert_eq!(balance.available_credits, 10);
        assert_eq!(balance.locked_credits, 0);
        assert_eq!(cashout_status(&db, &payout), TransactionStatus::Failed);

        // Repeated failure (webhook + sweep racing) must not restore twice.
        mark_failed(&db, &payout.payout_id, Some("DENIED"), None).unwrap();
        assert_eq!(db.balance("u1").unwrap().available_credits, 10);
    }

    #[test]
    fn paid_is_never_downgraded_to_failed() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        approve_payout(&db, &payout.payout_id, "admin").unwrap();
        begin_execution(&db, &payout.payout_id).unwrap();
        mark_paid(&db, &payout.payout_id).unwrap();

        // Any combination and repetition of failure signals after `paid`
        // leaves the payout paid and the balance untouched.
        for _ in 0..2 {
            let record = mark_failed(&db, &payout.payout_id, Some("FAILED"), None).unwrap();
            assert_eq!(record.status, PayoutStatus::Paid);
        }
        assert_eq!(db.balance("u1").unwrap().available_credits, 0);
        assert_eq!(cashout_status(&db, &payout), TransactionStatus::Completed);
    }

    #[test]
    fn credits_flow_from_confirmed_deposit_to_paid_payout() {
        let (_temp, db, settings) = setup();

        // Deposit: 10 credits confirmed → 10 available / 0 locked.
        let purchase = TransactionRecord::new_pending(
            "u1",
            TransactionKind::CreditPurchase,
            10,
            0,
            Some("whish_collect_s1".to_string()),
        );
        db.insert_transaction(&purchase).unwrap();
        crate::deposits::confirm_deposit(
            &db,
            "whish_collect_s1",
            crate::deposits::DepositOutcome::Success,
            None,
        )
        .unwrap();
        assert_eq!(db.balance("u1").unwrap(), crate::storage::UserBalance {
            available_credits: 10,
            locked_credits: 0,
        });

        // Payout of 10 gross at 20% fee → 0 available / 10 locked, net 8.
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        assert_eq!(db.balance("u1").unwrap().locked_credits, 10);
        assert_eq!(payout.net_amount, 8);
        assert_eq!(payout.fee_amount, 2);

        // Approval: lock consumed, admin earns the fee.
        approve_payout(&db, &payout.payout_id, "admin").unwrap();
        assert_eq!(db.balance("u1").unwrap().locked_credits, 0);
        assert_eq!(db.balance("admin").unwrap().available_credits, 2);

        // Execution succeeds with provider reference "X", then confirms.
        begin_execution(&db, &payout.payout_id).unwrap().unwrap();
        record_provider_reference(&db, &payout.payout_id, "X").unwrap();
        assert_eq!(
            db.payout(&payout.payout_id).unwrap().status,
            PayoutStatus::Processing
        );
        let paid = mark_paid(&db, &payout.payout_id).unwrap();
        assert_eq!(paid.status, PayoutStatus::Paid);
        assert_eq!(paid.provider_reference.as_deref(), Some("X"));
    }

    #[test]
    fn hydration_snapshots_the_default_method_receiver() {
        let (_temp, db, settings) = setup();
        let cipher = settings.method_cipher.clone().unwrap();
        db.credit("u1", 10).unwrap();

        let sealed = cipher
            .seal(&json!({"receiver": "teacher@example.com", "label": "Main"}))
            .unwrap();
        db.insert_payout_method(PayoutMethodRecord::new(
            "u1",
            ProviderKind::Paypal,
            "paypal_email",
            sealed,
            true,
        ))
        .unwrap();

        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();
        let hydrated = hydrate_method_details(&db, Some(cipher.as_ref()), &payout).unwrap();

        assert_eq!(hydrated.method.as_deref(), Some("paypal_email"));
        assert_eq!(
            hydrated.method_details.unwrap()["receiver"],
            "teacher@example.com"
        );
    }

    #[test]
    fn hydration_without_a_method_is_a_configuration_error() {
        let (_temp, db, settings) = setup();
        let cipher = settings.method_cipher.clone().unwrap();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Paypal, None).unwrap();

        assert!(matches!(
            hydrate_method_details(&db, Some(cipher.as_ref()), &payout),
            Err(PayoutError::Provider(ProviderError::ConfigurationMissing(_)))
        ));
    }

    #[test]
    fn manual_payouts_skip_hydration() {
        let (_temp, db, settings) = setup();
        db.credit("u1", 10).unwrap();
        let payout =
            request_payout(&db, &settings, "u1", false, 10, ProviderKind::Manual, None).unwrap();
        let hydrated = hydrate_method_details(&db, None, &payout).unwrap();
        assert!(hydrated.method_details.is_none());
    }
}
