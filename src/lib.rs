// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! SkillSwap Payments - Wallet Ledger & Payout Reconciliation Service
//!
//! The payments core of the SkillSwap marketplace: a credit ledger, a
//! webhook-driven payout lifecycle state machine, deposit confirmation and
//! a reconciliation sweep, kept consistent under concurrent requests,
//! duplicate callbacks and partial provider failures.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum) and webhook receivers
//! - `storage` - Embedded ACID ledger (redb)
//! - `providers` - Payment provider clients (Manual, PayPal, Whish)
//! - `payouts` - Payout lifecycle engine
//! - `deposits` - Deposit confirmation engine
//! - `webhooks` - Webhook dispatch and replay
//! - `reconciler` - Background reconciliation sweep

pub mod api;
pub mod config;
pub mod deposits;
pub mod error;
pub mod payouts;
pub mod providers;
pub mod reconciler;
pub mod state;
pub mod storage;
pub mod webhooks;
