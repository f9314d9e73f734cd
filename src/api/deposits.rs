// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Deposit intake: buy credits through a hosted provider flow.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    api::identity::Caller,
    deposits::{create_paypal_order, create_whish_collect, DepositError},
    error::ApiError,
    providers::DepositContext,
    state::AppState,
};

/// Request body for a PayPal credit purchase.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PayPalDepositBody {
    /// Credits to buy (charged at 1 currency unit per credit).
    pub credits: u64,
    /// Optional client redirect after approval.
    #[serde(default)]
    pub return_url: Option<String>,
    /// Optional client redirect after cancellation.
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// Request body for a Whish credit purchase.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WhishDepositBody {
    /// Credits to buy.
    pub credits: u64,
}

/// PayPal deposit flow response.
#[derive(Debug, Serialize, ToSchema)]
pub struct PayPalDepositResponse {
    pub transaction_id: String,
    /// Reference the confirmation webhook will carry.
    pub reference: String,
    /// Where to send the buyer to approve the payment.
    pub approval_url: String,
    pub order_id: String,
}

/// Whish deposit flow response.
#[derive(Debug, Serialize, ToSchema)]
pub struct WhishDepositResponse {
    pub transaction_id: String,
    pub reference: String,
    /// Where to send the buyer to complete the collect flow.
    pub collect_url: String,
}

pub(crate) fn map_deposit_error(error: DepositError) -> ApiError {
    match error {
        DepositError::Ledger(inner) => inner.into(),
        DepositError::Provider(inner) => inner.into(),
    }
}

/// Start a PayPal checkout for buying credits. Credits are granted only
/// after the capture is confirmed by webhook or reconciliation.
#[utoipa::path(
    post,
    path = "/v1/deposits/paypal",
    tag = "Deposits",
    request_body = PayPalDepositBody,
    responses(
        (status = 201, description = "Checkout order created", body = PayPalDepositResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid credits amount"),
        (status = 503, description = "Provider unavailable")
    )
)]
pub async fn create_paypal_deposit(
    Caller(user): Caller,
    State(state): State<AppState>,
    Json(body): Json<PayPalDepositBody>,
) -> Result<(StatusCode, Json<PayPalDepositResponse>), ApiError> {
    let context = DepositContext {
        return_url: body.return_url,
        cancel_url: body.cancel_url,
    };
    let flow = create_paypal_order(&state, &user.user_id, body.credits, context)
        .await
        .map_err(map_deposit_error)?;

    Ok((
        StatusCode::CREATED,
        Json(PayPalDepositResponse {
            transaction_id: flow.transaction_id,
            reference: flow.reference,
            approval_url: flow.collect_url,
            order_id: flow.provider_reference,
        }),
    ))
}

/// Start a Whish collect flow for buying credits.
#[utoipa::path(
    post,
    path = "/v1/deposits/whish",
    tag = "Deposits",
    request_body = WhishDepositBody,
    responses(
        (status = 201, description = "Collect flow created", body = WhishDepositResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid credits amount"),
        (status = 503, description = "Provider unavailable")
    )
)]
pub async fn create_whish_deposit(
    Caller(user): Caller,
    State(state): State<AppState>,
    Json(body): Json<WhishDepositBody>,
) -> Result<(StatusCode, Json<WhishDepositResponse>), ApiError> {
    let flow = create_whish_collect(&state, &user.user_id, body.credits)
        .await
        .map_err(map_deposit_error)?;

    Ok((
        StatusCode::CREATED,
        Json(WhishDepositResponse {
            transaction_id: flow.transaction_id,
            reference: flow.reference,
            collect_url: flow.collect_url,
        }),
    ))
}
