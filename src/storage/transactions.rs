// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Ledger entries: immutable-once-terminal records of every credit movement.
//!
//! A transaction is created `pending` when an operation begins and is
//! status-updated exactly once to a terminal value. Rows are never deleted;
//! they are the audit trail the reconciliation tooling relies on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ledger_db::{
    get_json, put_json, scan_json, BlobTable, LedgerDb, LedgerError, LedgerResult, TRANSACTIONS,
    TX_BY_REFERENCE,
};

/// What a ledger entry represents. Signed-ness of `amount` is implied by the
/// kind: purchases/earnings/refunds add credits, payments/cashouts remove
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits bought through a deposit provider.
    CreditPurchase,
    /// Credits spent on a skill session.
    SkillPayment,
    /// Credits earned from teaching a skill (platform fees land here too).
    SkillEarning,
    /// Credits leaving the platform through a payout.
    Cashout,
    /// Credits returned after a cancelled skill session.
    Refund,
}

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// Persisted ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionRecord {
    /// Unique transaction identifier (UUID).
    pub transaction_id: String,
    /// User whose balance this entry concerns.
    pub user_id: String,
    /// What the entry represents.
    pub kind: TransactionKind,
    /// Credit amount (always positive; direction implied by `kind`).
    pub amount: u64,
    /// Platform fee withheld, in credits.
    pub fee: u64,
    /// Current status.
    pub status: TransactionStatus,
    /// Correlates to a payout (`payout_<id>`) or an external provider
    /// reference (`paypal_order_<id>`, `whish_collect_<uuid>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Construct a new pending entry.
    pub fn new_pending(
        user_id: impl Into<String>,
        kind: TransactionKind,
        amount: u64,
        fee: u64,
        reference_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            amount,
            fee,
            status: TransactionStatus::Pending,
            reference_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct an entry that is already terminal (e.g. a fee earning
    /// recorded at approval time).
    pub fn new_completed(
        user_id: impl Into<String>,
        kind: TransactionKind,
        amount: u64,
        fee: u64,
        reference_id: Option<String>,
    ) -> Self {
        let mut record = Self::new_pending(user_id, kind, amount, fee, reference_id);
        record.status = TransactionStatus::Completed;
        record
    }
}

/// Insert a transaction and register its reference in the lookup index.
pub(crate) fn insert_transaction_in(
    tx_table: &mut BlobTable<'_>,
    ref_table: &mut redb::Table<'_, &'static str, &'static str>,
    record: &TransactionRecord,
) -> LedgerResult<()> {
    put_json(tx_table, &record.transaction_id, record)?;
    if let Some(reference) = record.reference_id.as_deref() {
        ref_table.insert(reference, record.transaction_id.as_str())?;
    }
    Ok(())
}

/// Re-point a transaction at a new reference (deposit flows swap a
/// temporary reference for the provider-assigned one).
pub(crate) fn reindex_reference_in(
    tx_table: &mut BlobTable<'_>,
    ref_table: &mut redb::Table<'_, &'static str, &'static str>,
    transaction_id: &str,
    new_reference: &str,
) -> LedgerResult<TransactionRecord> {
    let mut record: TransactionRecord = get_json(tx_table, transaction_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))?;
    if let Some(old) = record.reference_id.as_deref() {
        ref_table.remove(old)?;
    }
    record.reference_id = Some(new_reference.to_string());
    record.updated_at = Utc::now();
    put_json(tx_table, transaction_id, &record)?;
    ref_table.insert(new_reference, transaction_id)?;
    Ok(record)
}

/// Look up a transaction by its reference, if any.
pub(crate) fn find_by_reference_in<RefTbl, TxTbl>(
    ref_table: &RefTbl,
    tx_table: &TxTbl,
    reference: &str,
) -> LedgerResult<Option<TransactionRecord>>
where
    RefTbl: redb::ReadableTable<&'static str, &'static str>,
    TxTbl: redb::ReadableTable<&'static str, &'static [u8]>,
{
    let transaction_id = match ref_table.get(reference)? {
        Some(guard) => guard.value().to_string(),
        None => return Ok(None),
    };
    get_json(tx_table, &transaction_id)
}

/// Move a pending transaction to a terminal status. A no-op when the row is
/// already terminal, so webhook and reconciliation paths cannot fight over
/// it.
pub(crate) fn finish_transaction_in(
    tx_table: &mut BlobTable<'_>,
    transaction_id: &str,
    status: TransactionStatus,
) -> LedgerResult<TransactionRecord> {
    let mut record: TransactionRecord = get_json(tx_table, transaction_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))?;
    if record.status == TransactionStatus::Pending {
        record.status = status;
        record.updated_at = Utc::now();
        put_json(tx_table, transaction_id, &record)?;
    }
    Ok(record)
}

impl LedgerDb {
    /// Get a transaction by ID.
    pub fn transaction(&self, transaction_id: &str) -> LedgerResult<TransactionRecord> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        get_json(&table, transaction_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))
    }

    /// Look up a transaction by its reference.
    pub fn find_transaction_by_reference(
        &self,
        reference: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        let read_txn = self.begin_read()?;
        let ref_table = read_txn.open_table(TX_BY_REFERENCE)?;
        let tx_table = read_txn.open_table(TRANSACTIONS)?;
        find_by_reference_in(&ref_table, &tx_table, reference)
    }

    /// Insert a standalone transaction (outside a larger transition).
    pub fn insert_transaction(&self, record: &TransactionRecord) -> LedgerResult<()> {
        let write_txn = self.begin_write()?;
        {
            let mut tx_table = write_txn.open_table(TRANSACTIONS)?;
            let mut ref_table = write_txn.open_table(TX_BY_REFERENCE)?;
            insert_transaction_in(&mut tx_table, &mut ref_table, record)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All ledger entries for a user, newest first.
    pub fn list_transactions_for_user(
        &self,
        user_id: &str,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let mut records: Vec<TransactionRecord> = scan_json(&table)?
            .into_iter()
            .filter(|record: &TransactionRecord| record.user_id == user_id)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
