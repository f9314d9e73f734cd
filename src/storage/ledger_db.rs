// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `balances`: user_id → serialized UserBalance
//! - `transactions`: transaction_id → serialized TransactionRecord
//! - `tx_by_reference`: reference_id → transaction_id
//! - `payouts`: payout_id → serialized PayoutRecord
//! - `payout_methods`: method_id → serialized PayoutMethodRecord
//! - `webhook_events`: event_id → serialized WebhookEventRecord
//!
//! ## Atomicity
//!
//! redb admits a single write transaction at a time. Every balance mutation
//! and every payout/deposit state transition runs inside one write
//! transaction that opens all the tables it touches, so a transition either
//! commits in full or not at all, and concurrent transitions on the same
//! records serialize. No write transaction is ever held across a provider
//! network call.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

/// Per-user credit balances: user_id → serialized UserBalance (JSON bytes).
pub(crate) const BALANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("balances");

/// Ledger entries: transaction_id → serialized TransactionRecord.
pub(crate) const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// Index: reference_id → transaction_id. Webhooks locate deposits by the
/// provider reference; payout transitions locate the cashout row by
/// `payout_<id>`.
pub(crate) const TX_BY_REFERENCE: TableDefinition<&str, &str> =
    TableDefinition::new("tx_by_reference");

/// Payout requests: payout_id → serialized PayoutRecord.
pub(crate) const PAYOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("payouts");

/// Saved payout destinations: method_id → serialized PayoutMethodRecord.
pub(crate) const PAYOUT_METHODS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("payout_methods");

/// Inbound provider callbacks: event_id → serialized WebhookEventRecord.
pub(crate) const WEBHOOK_EVENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("webhook_events");

/// Write-transaction table over JSON blob values.
pub(crate) type BlobTable<'txn> = redb::Table<'txn, &'static str, &'static [u8]>;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient available credits")]
    InsufficientFunds,

    #[error("insufficient locked credits")]
    InsufficientLockedFunds,

    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// =============================================================================
// LedgerDb
// =============================================================================

/// Embedded ACID ledger database.
pub struct LedgerDb {
    db: Database,
}

impl LedgerDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BALANCES)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(TX_BY_REFERENCE)?;
            let _ = write_txn.open_table(PAYOUTS)?;
            let _ = write_txn.open_table(PAYOUT_METHODS)?;
            let _ = write_txn.open_table(WEBHOOK_EVENTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a write transaction (the atomic unit for every transition).
    pub(crate) fn begin_write(&self) -> LedgerResult<redb::WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Begin a read transaction.
    pub(crate) fn begin_read(&self) -> LedgerResult<redb::ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Verify the database is readable.
    pub fn health_check(&self) -> LedgerResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(BALANCES)?;
        Ok(())
    }
}

// =============================================================================
// Generic JSON value helpers
// =============================================================================

/// Read a JSON-serialized record out of a blob table.
pub(crate) fn get_json<T, Tbl>(table: &Tbl, key: &str) -> LedgerResult<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

/// Write a record into a blob table as JSON bytes.
pub(crate) fn put_json<T: Serialize>(
    table: &mut BlobTable<'_>,
    key: &str,
    value: &T,
) -> LedgerResult<()> {
    let json = serde_json::to_vec(value)?;
    table.insert(key, json.as_slice())?;
    Ok(())
}

/// Deserialize every record in a blob table.
///
/// The ledger's entity counts are small enough that list endpoints and the
/// reconciliation sweep scan and filter rather than maintain extra indexes.
pub(crate) fn scan_json<T, Tbl>(table: &Tbl) -> LedgerResult<Vec<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let mut records = Vec::new();
    for entry in table.iter()? {
        let (_key, value) = entry?;
        records.push(serde_json::from_slice(value.value())?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        count: u64,
    }

    fn open_db() -> (TempDir, LedgerDb) {
        let temp = TempDir::new().unwrap();
        let db = LedgerDb::open(&temp.path().join("ledger.redb")).unwrap();
        (temp, db)
    }

    #[test]
    fn open_precreates_tables_and_health_check_passes() {
        let (_temp, db) = open_db();
        db.health_check().unwrap();
    }

    #[test]
    fn json_round_trip_through_blob_table() {
        let (_temp, db) = open_db();
        let probe = Probe {
            name: "p1".to_string(),
            count: 3,
        };

        let write_txn = db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(BALANCES).unwrap();
            put_json(&mut table, "k1", &probe).unwrap();
        }
        write_txn.commit().unwrap();

        let read_txn = db.begin_read().unwrap();
        let table = read_txn.open_table(BALANCES).unwrap();
        let loaded: Option<Probe> = get_json(&table, "k1").unwrap();
        assert_eq!(loaded, Some(probe));

        let missing: Option<Probe> = get_json(&table, "absent").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn scan_returns_all_records() {
        let (_temp, db) = open_db();

        let write_txn = db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(BALANCES).unwrap();
            for i in 0..3u64 {
                let probe = Probe {
                    name: format!("p{i}"),
                    count: i,
                };
                put_json(&mut table, &format!("k{i}"), &probe).unwrap();
            }
        }
        write_txn.commit().unwrap();

        let read_txn = db.begin_read().unwrap();
        let table = read_txn.open_table(BALANCES).unwrap();
        let records: Vec<Probe> = scan_json(&table).unwrap();
        assert_eq!(records.len(), 3);
    }
}
