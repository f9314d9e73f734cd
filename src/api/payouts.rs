// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Payout request intake and listing for marketplace users.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    api::identity::Caller,
    error::ApiError,
    payouts::{request_payout, PayoutError},
    providers::ProviderKind,
    state::AppState,
    storage::{PayoutRecord, PayoutStatus},
};

/// Request body for creating a payout.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RequestPayoutBody {
    /// Gross credits to withdraw (the fee is taken out of this).
    pub gross_amount: u64,
    /// Payout provider to route through.
    pub provider: ProviderKind,
    /// Saved payout method to use; the provider default when omitted.
    #[serde(default)]
    pub method_id: Option<String>,
}

/// Payout representation returned to clients. Routing details stay
/// server-side.
#[derive(Debug, Serialize, ToSchema)]
pub struct PayoutResponse {
    pub payout_id: String,
    pub status: PayoutStatus,
    pub provider: ProviderKind,
    pub gross_amount: u64,
    pub fee_amount: u64,
    pub net_amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<PayoutRecord> for PayoutResponse {
    fn from(record: PayoutRecord) -> Self {
        Self {
            payout_id: record.payout_id,
            status: record.status,
            provider: record.provider,
            gross_amount: record.gross_amount,
            fee_amount: record.fee_amount,
            net_amount: record.net_amount,
            method: record.method,
            provider_reference: record.provider_reference,
            admin_note: record.admin_note,
            failure_code: record.failure_code,
            failure_message: record.failure_message,
            created_at: record.created_at,
            processed_at: record.processed_at,
        }
    }
}

/// Payout list response.
#[derive(Debug, Serialize, ToSchema)]
pub struct PayoutListResponse {
    pub payouts: Vec<PayoutResponse>,
    pub total: usize,
}

pub(crate) fn map_payout_error(error: PayoutError) -> ApiError {
    match error {
        PayoutError::Ledger(inner) => inner.into(),
        PayoutError::Provider(inner) => inner.into(),
        PayoutError::ManualExecution => ApiError::conflict(error.to_string()),
    }
}

/// Request a payout of `gross_amount` credits.
#[utoipa::path(
    post,
    path = "/v1/payouts",
    tag = "Payouts",
    request_body = RequestPayoutBody,
    responses(
        (status = 201, description = "Payout request created", body = PayoutResponse),
        (status = 400, description = "Insufficient credits or unsupported provider"),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Amount below minimum or net not positive")
    )
)]
pub async fn create_payout(
    Caller(user): Caller,
    State(state): State<AppState>,
    Json(body): Json<RequestPayoutBody>,
) -> Result<(StatusCode, Json<PayoutResponse>), ApiError> {
    let record = request_payout(
        &state.db,
        &state.settings,
        &user.user_id,
        user.is_admin(),
        body.gross_amount,
        body.provider,
        body.method_id,
    )
    .map_err(map_payout_error)?;

    Ok((StatusCode::CREATED, Json(record.into())))
}

/// List the caller's payouts, newest first.
#[utoipa::path(
    get,
    path = "/v1/payouts",
    tag = "Payouts",
    responses(
        (status = 200, description = "Caller's payouts", body = PayoutListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_my_payouts(
    Caller(user): Caller,
    State(state): State<AppState>,
) -> Result<Json<PayoutListResponse>, ApiError> {
    let payouts: Vec<PayoutResponse> = state
        .db
        .list_payouts_for_user(&user.user_id)?
        .into_iter()
        .map(PayoutResponse::from)
        .collect();
    Ok(Json(PayoutListResponse {
        total: payouts.len(),
        payouts,
    }))
}
