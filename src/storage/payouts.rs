// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Payout records: one row per withdrawal request, never deleted.
//!
//! Rows are mutated only inside the payout engine's write transactions; the
//! helpers here are the storage primitives those transitions compose.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ledger_db::{
    get_json, put_json, scan_json, BlobTable, LedgerDb, LedgerError, LedgerResult, PAYOUTS,
};
use crate::providers::ProviderKind;

/// Payout lifecycle status.
///
/// `pending → approved → processing → {paid | failed}`, with
/// `pending/approved → rejected` and `approved/processing → failed` as side
/// exits. `paid` is never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Approved,
    Rejected,
    Processing,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Approved => "approved",
            PayoutStatus::Rejected => "rejected",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted payout request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayoutRecord {
    /// Unique payout identifier (UUID).
    pub payout_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Credits requested (locked at request time).
    pub gross_amount: u64,
    /// Platform cut, in credits.
    pub fee_amount: u64,
    /// Credits actually transferred to the user (gross − fee).
    pub net_amount: u64,
    /// Provider responsible for the transfer.
    pub provider: ProviderKind,
    /// Saved payout method chosen at request time, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_id: Option<String>,
    /// Routing method, e.g. `paypal_email`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Minimal routing snapshot copied from the saved method at execution
    /// time (e.g. `{"receiver": "<email>"}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub method_details: Option<serde_json::Value>,
    /// Reference assigned once the provider accepts the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    /// Generated once at creation and reused on every provider call.
    pub idempotency_key: String,
    /// Current lifecycle status.
    pub status: PayoutStatus,
    /// Admin note recorded on rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_note: Option<String>,
    /// Admin who approved the payout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    /// When the payout reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutRecord {
    /// Construct a new pending payout. The idempotency key is generated here
    /// and never changes.
    pub fn new_pending(
        user_id: impl Into<String>,
        gross_amount: u64,
        fee_amount: u64,
        provider: ProviderKind,
        method_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            payout_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            gross_amount,
            fee_amount,
            net_amount: gross_amount.saturating_sub(fee_amount),
            provider,
            method_id,
            method: None,
            method_details: None,
            provider_reference: None,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            status: PayoutStatus::Pending,
            admin_note: None,
            approved_by: None,
            approved_at: None,
            processed_at: None,
            failure_code: None,
            failure_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reference under which the cashout ledger entry is filed.
    pub fn transaction_reference(&self) -> String {
        format!("payout_{}", self.payout_id)
    }

    /// Reference under which the approval fee earning is filed.
    pub fn fee_reference(&self) -> String {
        format!("payout_fee_{}", self.payout_id)
    }
}

/// Load a payout inside an open transaction, failing if absent.
pub(crate) fn get_payout_in<Tbl>(table: &Tbl, payout_id: &str) -> LedgerResult<PayoutRecord>
where
    Tbl: redb::ReadableTable<&'static str, &'static [u8]>,
{
    get_json(table, payout_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("payout {payout_id}")))
}

/// Persist a payout inside an open transaction, stamping `updated_at`.
pub(crate) fn put_payout_in(
    table: &mut BlobTable<'_>,
    record: &mut PayoutRecord,
) -> LedgerResult<()> {
    record.updated_at = Utc::now();
    put_json(table, &record.payout_id.clone(), record)
}

impl LedgerDb {
    /// Get a payout by ID.
    pub fn payout(&self, payout_id: &str) -> LedgerResult<PayoutRecord> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PAYOUTS)?;
        get_payout_in(&table, payout_id)
    }

    /// All payouts for a user, newest first.
    pub fn list_payouts_for_user(&self, user_id: &str) -> LedgerResult<Vec<PayoutRecord>> {
        self.list_payouts(|record| record.user_id == user_id)
    }

    /// Payouts matching a status, newest first.
    pub fn list_payouts_by_status(&self, status: PayoutStatus) -> LedgerResult<Vec<PayoutRecord>> {
        self.list_payouts(|record| record.status == status)
    }

    /// All payouts, newest first.
    pub fn list_all_payouts(&self) -> LedgerResult<Vec<PayoutRecord>> {
        self.list_payouts(|_| true)
    }

    /// `processing` payouts that already hold a provider reference — the
    /// reconciliation sweep's work list.
    pub fn list_processing_payouts(
        &self,
        provider: Option<ProviderKind>,
        limit: usize,
    ) -> LedgerResult<Vec<PayoutRecord>> {
        let mut records = self.list_payouts(|record| {
            record.status == PayoutStatus::Processing
                && record.provider_reference.is_some()
                && provider.is_none_or(|p| record.provider == p)
        })?;
        // Oldest first: stuck payouts get reconciled before fresh ones.
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Correlate a provider callback to a payout. The provider reference is
    /// checked first; the idempotency key covers the race where a webhook
    /// arrives before the execution job stored the provider's batch id.
    pub fn find_payout_by_provider_reference(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> LedgerResult<Option<PayoutRecord>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PAYOUTS)?;
        let records: Vec<PayoutRecord> = scan_json(&table)?;
        let by_reference = records
            .iter()
            .find(|r| r.provider == provider && r.provider_reference.as_deref() == Some(reference));
        if let Some(record) = by_reference {
            return Ok(Some(record.clone()));
        }
        Ok(records
            .into_iter()
            .find(|r| r.provider == provider && r.idempotency_key == reference))
    }

    fn list_payouts<F>(&self, filter: F) -> LedgerResult<Vec<PayoutRecord>>
    where
        F: Fn(&PayoutRecord) -> bool,
    {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PAYOUTS)?;
        let mut records: Vec<PayoutRecord> = scan_json(&table)?
            .into_iter()
            .filter(|record: &PayoutRecord| filter(record))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, LedgerDb) {
        let temp = TempDir::new().unwrap();
        let db = LedgerDb::open(&temp.path().join("ledger.redb")).unwrap();
        (temp, db)
    }

    fn store(db: &LedgerDb, record: &mut PayoutRecord) {
        let write_txn = db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(PAYOUTS).unwrap();
            put_payout_in(&mut table, record).unwrap();
        }
        write_txn.commit().unwrap();
    }

    #[test]
    fn new_pending_computes_net_and_generates_keys() {
        let record = PayoutRecord::new_pending("u1", 10, 2, ProviderKind::Paypal, None);
        assert_eq!(record.net_amount, 8);
        assert_eq!(record.status, PayoutStatus::Pending);
        assert!(!record.idempotency_key.is_empty());
        assert!(record
            .transaction_reference()
            .starts_with("payout_"));
    }

    #[test]
    fn processing_work_list_filters_by_provider_and_reference() {
        let (_temp, db) = open_db();

        let mut with_ref = PayoutRecord::new_pending("u1", 10, 0, ProviderKind::Paypal, None);
        with_ref.status = PayoutStatus::Processing;
        with_ref.provider_reference = Some("batch-1".to_string());
        store(&db, &mut with_ref);

        let mut no_ref = PayoutRecord::new_pending("u2", 10, 0, ProviderKind::Paypal, None);
        no_ref.status = PayoutStatus::Processing;
        store(&db, &mut no_ref);

        let mut manual = PayoutRecord::new_pending("u3", 10, 0, ProviderKind::Manual, None);
        manual.status = PayoutStatus::Processing;
        manual.provider_reference = Some("manual-x".to_string());
        store(&db, &mut manual);

        let work = db
            .list_processing_payouts(Some(ProviderKind::Paypal), 50)
            .unwrap();
        assert_eq!(work.len(), 1);
        assert_eq!(work[0].payout_id, with_ref.payout_id);

        let all = db.list_processing_payouts(None, 50).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn webhook_correlation_falls_back_to_idempotency_key() {
        let (_temp, db) = open_db();

        let mut record = PayoutRecord::new_pending("u1", 10, 0, ProviderKind::Paypal, None);
        record.status = PayoutStatus::Processing;
        store(&db, &mut record);

        // No provider reference stored yet: resolve by idempotency key.
        let by_key = db
            .find_payout_by_provider_reference(ProviderKind::Paypal, &record.idempotency_key)
            .unwrap()
            .expect("idempotency key should correlate");
        assert_eq!(by_key.payout_id, record.payout_id);

        record.provider_reference = Some("batch-9".to_string());
        store(&db, &mut record);

        let by_ref = db
            .find_payout_by_provider_reference(ProviderKind::Paypal, "batch-9")
            .unwrap()
            .expect("provider reference should correlate");
        assert_eq!(by_ref.payout_id, record.payout_id);

        assert!(db
            .find_payout_by_provider_reference(ProviderKind::Manual, "batch-9")
            .unwrap()
            .is_none());
    }
}
