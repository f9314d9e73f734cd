// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Wallet balance and ledger history endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    api::identity::Caller,
    error::ApiError,
    state::AppState,
    storage::{TransactionRecord, UserBalance},
};

/// Wallet response: the caller's credit balance.
#[derive(Debug, Serialize, ToSchema)]
pub struct WalletResponse {
    /// Credits spendable right now.
    pub available_credits: u64,
    /// Credits reserved for pending payouts.
    pub locked_credits: u64,
}

impl From<UserBalance> for WalletResponse {
    fn from(balance: UserBalance) -> Self {
        Self {
            available_credits: balance.available_credits,
            locked_credits: balance.locked_credits,
        }
    }
}

/// Ledger history response.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionListResponse {
    pub transactions: Vec<TransactionRecord>,
    pub total: usize,
}

/// Get the caller's credit balance.
#[utoipa::path(
    get,
    path = "/v1/wallet",
    tag = "Wallet",
    responses(
        (status = 200, description = "Current balance", body = WalletResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_wallet(
    Caller(user): Caller,
    State(state): State<AppState>,
) -> Result<Json<WalletResponse>, ApiError> {
    let balance = state.db.balance(&user.user_id)?;
    Ok(Json(balance.into()))
}

/// List the caller's ledger entries, newest first.
#[utoipa::path(
    get,
    path = "/v1/wallet/transactions",
    tag = "Wallet",
    responses(
        (status = 200, description = "Ledger entries", body = TransactionListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_transactions(
    Caller(user): Caller,
    State(state): State<AppState>,
) -> Result<Json<TransactionListResponse>, ApiError> {
    let transactions = state.db.list_transactions_for_user(&user.user_id)?;
    Ok(Json(TransactionListResponse {
        total: transactions.len(),
        transactions,
    }))
}
