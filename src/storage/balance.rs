// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Wallet ledger: atomic credit/debit/lock/unlock operations on per-user
//! balances.
//!
//! `locked_credits` are reserved against a pending payout and excluded from
//! the spendable balance. `lock`/`unlock` redistribute between the two
//! buckets without changing their sum; only `credit`/`debit`/`consume_locked`
//! change it.
//!
//! Each operation comes in two forms: an `*_in` helper that works on an open
//! `balances` table so larger transitions can compose several balance
//! mutations into one write transaction (payout approval touches both the
//! requester's locked balance and the approving admin's available balance),
//! and a one-shot wrapper on [`LedgerDb`] that begins and commits its own
//! transaction.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ledger_db::{get_json, put_json, BlobTable, LedgerDb, LedgerError, LedgerResult, BALANCES};

/// Per-user credit balance. Unsigned fields make the non-negativity
/// invariant structural; every mutation uses checked arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserBalance {
    /// Credits spendable right now.
    pub available_credits: u64,
    /// Credits reserved for pending payouts.
    pub locked_credits: u64,
}

fn ensure_positive(amount: u64) -> LedgerResult<()> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount(
            "credits must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Load a user's balance, defaulting to zero for users with no row yet.
pub(crate) fn load_balance<Tbl>(table: &Tbl, user_id: &str) -> LedgerResult<UserBalance>
where
    Tbl: redb::ReadableTable<&'static str, &'static [u8]>,
{
    Ok(get_json(table, user_id)?.unwrap_or_default())
}

/// Increase `available_credits`.
pub(crate) fn credit_in(
    table: &mut BlobTable<'_>,
    user_id: &str,
    amount: u64,
) -> LedgerResult<UserBalance> {
    ensure_positive(amount)?;
    let mut balance = load_balance(table, user_id)?;
    balance.available_credits = balance
        .available_credits
        .checked_add(amount)
        .ok_or_else(|| LedgerError::InvalidAmount("balance overflow".to_string()))?;
    put_json(table, user_id, &balance)?;
    Ok(balance)
}

/// Decrease `available_credits`.
pub(crate) fn debit_in(
    table: &mut BlobTable<'_>,
    user_id: &str,
    amount: u64,
) -> LedgerResult<UserBalance> {
    ensure_positive(amount)?;
    let mut balance = load_balance(table, user_id)?;
    if balance.available_credits < amount {
        return Err(LedgerError::InsufficientFunds);
    }
    balance.available_credits -= amount;
    put_json(table, user_id, &balance)?;
    Ok(balance)
}

/// Move `amount` from `available_credits` to `locked_credits`.
pub(crate) fn lock_in(
    table: &mut BlobTable<'_>,
    user_id: &str,
    amount: u64,
) -> LedgerResult<UserBalance> {
    ensure_positive(amount)?;
    let mut balance = load_balance(table, user_id)?;
    if balance.available_credits < amount {
        return Err(LedgerError::InsufficientFunds);
    }
    balance.available_credits -= amount;
    balance.locked_credits = balance
        .locked_credits
        .checked_add(amount)
        .ok_or_else(|| LedgerError::InvalidAmount("balance overflow".to_string()))?;
    put_json(table, user_id, &balance)?;
    Ok(balance)
}

/// Move `amount` back from `locked_credits` to `available_credits`.
pub(crate) fn unlock_in(
    table: &mut BlobTable<'_>,
    user_id: &str,
    amount: u64,
) -> LedgerResult<UserBalance> {
    ensure_positive(amount)?;
    let mut balance = load_balance(table, user_id)?;
    if balance.locked_credits < amount {
        return Err(LedgerError::InsufficientLockedFunds);
    }
    balance.locked_credits -= amount;
    balance.available_credits = balance
        .available_credits
        .checked_add(amount)
        .ok_or_else(|| LedgerError::InvalidAmount("balance overflow".to_string()))?;
    put_json(table, user_id, &balance)?;
    Ok(balance)
}

/// Remove `amount` from `locked_credits` permanently. Used on payout
/// approval, turning a reservation into a real deduction.
pub(crate) fn consume_locked_in(
    table: &mut BlobTable<'_>,
    user_id: &str,
    amount: u64,
) -> LedgerResult<UserBalance> {
    ensure_positive(amount)?;
    let mut balance = load_balance(table, user_id)?;
    if balance.locked_credits < amount {
        return Err(LedgerError::InsufficientLockedFunds);
    }
    balance.locked_credits -= amount;
    put_json(table, user_id, &balance)?;
    Ok(balance)
}

impl LedgerDb {
    /// Current balance for a user (zero if the user has no ledger row yet).
    pub fn balance(&self, user_id: &str) -> LedgerResult<UserBalance> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(BALANCES)?;
        load_balance(&table, user_id)
    }

    /// Credit `amount` to the user's available balance.
    pub fn credit(&self, user_id: &str, amount: u64) -> LedgerResult<UserBalance> {
        self.with_balances(|table| credit_in(table, user_id, amount))
    }

    /// Debit `amount` from the user's available balance.
    pub fn debit(&self, user_id: &str, amount: u64) -> LedgerResult<UserBalance> {
        self.with_balances(|table| debit_in(table, user_id, amount))
    }

    /// Reserve `amount` of the user's available balance.
    pub fn lock(&self, user_id: &str, amount: u64) -> LedgerResult<UserBalance> {
        self.with_balances(|table| lock_in(table, user_id, amount))
    }

    /// Release a reservation back to the available balance.
    pub fn unlock(&self, user_id: &str, amount: u64) -> LedgerResult<UserBalance> {
        self.with_balances(|table| unlock_in(table, user_id, amount))
    }

    /// Permanently remove reserved credits.
    pub fn consume_locked(&self, user_id: &str, amount: u64) -> LedgerResult<UserBalance> {
        self.with_balances(|table| consume_locked_in(table, user_id, amount))
    }

    fn with_balances<F>(&self, op: F) -> LedgerResult<UserBalance>
    where
        F: FnOnce(&mut BlobTable<'_>) -> LedgerResult<UserBalance>,
    {
        let write_txn = self.begin_write()?;
        let balance = {
            let mut table = write_txn.open_table(BALANCES)?;
            op(&mut table)?
        };
        write_txn.commit()?;
        Ok(balance)
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

    #[test]
    fn balance_defaults_to_zero() {
        let (_temp, db) = open_db();
        let balance = db.balance("u1").unwrap();
        assert_eq!(balance, UserBalance::default());
    }

    #[test]
    fn credit_then_debit_round_trips() {
        let (_temp, db) = open_db();
        db.credit("u1", 10).unwrap();
        let balance = db.debit("u1", 4).unwrap();
        assert_eq!(balance.available_credits, 6);
        assert_eq!(balance.locked_credits, 0);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let (_temp, db) = open_db();
        assert!(matches!(
            db.credit("u1", 0),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            db.lock("u1", 0),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn debit_beyond_available_fails_without_effect() {
        let (_temp, db) = open_db();
        db.credit("u1", 5).unwrap();
        assert!(matches!(
            db.debit("u1", 6),
            Err(LedgerError::InsufficientFunds)
        ));
        assert_eq!(db.balance("u1").unwrap().available_credits, 5);
    }

    #[test]
    fn lock_excludes_credits_from_spendable_balance() {
        let (_temp, db) = open_db();
        db.credit("u1", 10).unwrap();
        db.lock("u1", 7).unwrap();

        // Only 3 spendable now.
        assert!(matches!(
            db.debit("u1", 4),
            Err(LedgerError::InsufficientFunds)
        ));
        assert!(matches!(
            db.lock("u1", 4),
            Err(LedgerError::InsufficientFunds)
        ));

        let balance = db.balance("u1").unwrap();
        assert_eq!(balance.available_credits, 3);
        assert_eq!(balance.locked_credits, 7);
    }

    #[test]
    fn lock_then_unlock_restores_both_buckets() {
        let (_temp, db) = open_db();
        db.credit("u1", 10).unwrap();
        let before = db.balance("u1").unwrap();

        db.lock("u1", 6).unwrap();
        db.unlock("u1", 6).unwrap();

        assert_eq!(db.balance("u1").unwrap(), before);
    }

    #[test]
    fn unlock_more_than_locked_fails() {
        let (_temp, db) = open_db();
        db.credit("u1", 10).unwrap();
        db.lock("u1", 3).unwrap();
        assert!(matches!(
            db.unlock("u1", 4),
            Err(LedgerError::InsufficientLockedFunds)
        ));
    }

    #[test]
    fn consume_locked_reduces_the_total() {
        let (_temp, db) = open_db();
        db.credit("u1", 10).unwrap();
        db.lock("u1", 10).unwrap();
        let balance = db.consume_locked("u1", 10).unwrap();

        assert_eq!(balance.available_credits, 0);
        assert_eq!(balance.locked_credits, 0);

        assert!(matches!(
            db.consume_locked("u1", 1),
            Err(LedgerError::InsufficientLockedFunds)
        ));
    }

    #[test]
    fn lock_unlock_preserve_sum_while_credit_debit_change_it() {
        let (_temp, db) = open_db();
        db.credit("u1", 20).unwrap();

        let sum = |b: UserBalance| b.available_credits + b.locked_credits;

        let after_lock = db.lock("u1", 8).unwrap();
        assert_eq!(sum(after_lock), 20);

        let after_unlock = db.unlock("u1", 5).unwrap();
        assert_eq!(sum(after_unlock), 20);

        let after_consume = db.consume_locked("u1", 3).unwrap();
        assert_eq!(sum(after_consume), 17);

        let after_debit = db.debit("u1", 2).unwrap();
        assert_eq!(sum(after_debit), 15);
    }
}
