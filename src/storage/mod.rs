// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! # Ledger Storage Module
//!
//! Persistent storage for the payments core, backed by **redb** (embedded,
//! pure Rust, ACID).
//!
//! ## Storage Layout
//!
//! One database file (`ledger.redb`) with a table per entity:
//!
//! ```text
//! balances        user_id   → UserBalance
//! transactions    tx_id     → TransactionRecord
//! tx_by_reference reference → tx_id
//! payouts         payout_id → PayoutRecord
//! payout_methods  method_id → PayoutMethodRecord
//! webhook_events  event_id  → WebhookEventRecord
//! ```
//!
//! ## Concurrency Model
//!
//! redb admits exactly one write transaction at a time. Every balance
//! mutation and every payout/deposit state transition is a single write
//! transaction opening all tables it touches, so cross-entity transitions
//! (payout + cashout transaction + requester and admin balances) commit
//! atomically, and concurrent transitions on the same records serialize.
//! Write transactions are never held across a provider network call.

pub mod balance;
pub mod ledger_db;
pub mod methods;
pub mod payouts;
pub mod transactions;
pub mod webhooks;

pub use balance::UserBalance;
pub use ledger_db::{LedgerDb, LedgerError, LedgerResult};
pub use methods::{safe_details, MethodCipher, MethodSealError, PayoutMethodRecord};
pub use payouts::{PayoutRecord, PayoutStatus};
pub use transactions::{TransactionKind, TransactionRecord, TransactionStatus};
pub use webhooks::WebhookEventRecord;
