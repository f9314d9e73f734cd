// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Admin endpoints: payout approval workflow, reconciliation trigger and
//! webhook event triage.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::identity::AdminOnly,
    api::payouts::{map_payout_error, PayoutListResponse, PayoutResponse},
    error::ApiError,
    payouts::{approve_payout, execute_approved_payout, mark_paid, reject_payout},
    providers::ProviderKind,
    reconciler::{reconcile_processing_payouts, ReconcileOutcome},
    state::AppState,
    storage::{PayoutStatus, WebhookEventRecord},
    webhooks::replay_event,
};

/// Query params for the admin payout listing.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AdminPayoutListQuery {
    /// Optional status filter.
    pub status: Option<PayoutStatus>,
}

/// Request body for rejecting a payout.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectPayoutBody {
    /// Reason shown to the requester.
    pub admin_note: String,
}

/// Request body for triggering a reconciliation sweep.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReconcileBody {
    /// Restrict the sweep to one provider.
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    /// Maximum payouts to examine (defaults to the configured batch limit).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Query params for webhook event triage.
#[derive(Debug, Deserialize, IntoParams)]
pub struct WebhookEventListQuery {
    /// Filter on the processed flag.
    pub processed: Option<bool>,
    /// Maximum events to return (default 50).
    pub limit: Option<usize>,
}

/// Webhook event list response.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookEventListResponse {
    pub events: Vec<WebhookEventRecord>,
    pub total: usize,
}

/// List payouts across all users.
#[utoipa::path(
    get,
    path = "/v1/admin/payouts",
    tag = "Admin",
    params(AdminPayoutListQuery),
    responses(
        (status = 200, description = "Payouts", body = PayoutListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    )
)]
pub async fn list_payouts(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Query(query): Query<AdminPayoutListQuery>,
) -> Result<Json<PayoutListResponse>, ApiError> {
    let records = match query.status {
        Some(status) => state.db.list_payouts_by_status(status)?,
        None => state.db.list_all_payouts()?,
    };
    let payouts: Vec<PayoutResponse> = records.into_iter().map(PayoutResponse::from).collect();
    Ok(Json(PayoutListResponse {
        total: payouts.len(),
        payouts,
    }))
}

/// Approve a pending payout. The fee lands in the approving admin's
/// balance, and automated providers are executed asynchronously — this
/// endpoint never blocks on the provider.
#[utoipa::path(
    post,
    path = "/v1/admin/payouts/{payout_id}/approve",
    tag = "Admin",
    params(("payout_id" = String, Path, description = "Payout ID")),
    responses(
        (status = 200, description = "Payout approved", body = PayoutResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Payout not found"),
        (status = 409, description = "Payout is not pending")
    )
)]
pub async fn approve(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(payout_id): Path<String>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let record =
        approve_payout(&state.db, &payout_id, &admin.user_id).map_err(map_payout_error)?;

    // Manual payouts wait for the admin's mark-paid; everything else goes
    // to the background execution job.
    if record.provider != ProviderKind::Manual {
        let task_state = state.clone();
        let task_payout_id = record.payout_id.clone();
        tokio::spawn(async move {
            if let Err(err) = execute_approved_payout(&task_state, &task_payout_id).await {
                error!(payout_id = %task_payout_id, error = %err, "payout execution job failed");
            }
        });
    }

    Ok(Json(record.into()))
}

/// Reject a payout and restore the requester's credits.
#[utoipa::path(
    post,
    path = "/v1/admin/payouts/{payout_id}/reject",
    tag = "Admin",
    params(("payout_id" = String, Path, description = "Payout ID")),
    request_body = RejectPayoutBody,
    responses(
        (status = 200, description = "Payout rejected", body = PayoutResponse),
        (status = 400, description = "Missing note"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Payout not found"),
        (status = 409, description = "Payout can no longer be rejected")
    )
)]
pub async fn reject(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(payout_id): Path<String>,
    Json(body): Json<RejectPayoutBody>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let note = body.admin_note.trim();
    if note.is_empty() {
        return Err(ApiError::bad_request("admin_note is required"));
    }
    let record = reject_payout(&state.db, &payout_id, note).map_err(map_payout_error)?;
    Ok(Json(record.into()))
}

/// Mark a payout paid by hand. Reserved for the manual provider: the money
/// moved outside the system, so only the admin can attest to it.
#[utoipa::path(
    post,
    path = "/v1/admin/payouts/{payout_id}/mark-paid",
    tag = "Admin",
    params(("payout_id" = String, Path, description = "Payout ID")),
    responses(
        (status = 200, description = "Payout marked paid", body = PayoutResponse),
        (status = 400, description = "Not a manual payout"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Payout not found"),
        (status = 409, description = "Payout is not approved")
    )
)]
pub async fn mark_paid_by_hand(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(payout_id): Path<String>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let record = state.db.payout(&payout_id)?;
    if record.provider != ProviderKind::Manual {
        return Err(ApiError::bad_request(
            "mark-paid is reserved for manual payouts; automated payouts settle via webhook or reconciliation",
        ));
    }
    let record = mark_paid(&state.db, &payout_id).map_err(map_payout_error)?;
    Ok(Json(record.into()))
}

/// Sweep `processing` payouts against provider status.
#[utoipa::path(
    post,
    path = "/v1/admin/reconcile",
    tag = "Admin",
    request_body = ReconcileBody,
    responses(
        (status = 200, description = "Sweep summary", body = ReconcileOutcome),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    )
)]
pub async fn reconcile(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    body: Option<Json<ReconcileBody>>,
) -> Json<ReconcileOutcome> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let limit = body
        .limit
        .unwrap_or(state.settings.reconcile_batch_limit)
        .max(1);
    let outcome = reconcile_processing_payouts(&state, body.provider, limit).await;
    Json(outcome)
}

/// List stored webhook events for triage.
#[utoipa::path(
    get,
    path = "/v1/admin/webhook-events",
    tag = "Admin",
    params(WebhookEventListQuery),
    responses(
        (status = 200, description = "Stored webhook events", body = WebhookEventListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required")
    )
)]
pub async fn list_webhook_events(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Query(query): Query<WebhookEventListQuery>,
) -> Result<Json<WebhookEventListResponse>, ApiError> {
    let events = state
        .db
        .list_webhook_events(query.processed, query.limit.unwrap_or(50))?;
    Ok(Json(WebhookEventListResponse {
        total: events.len(),
        events,
    }))
}

/// Re-run processing for a stored webhook event.
#[utoipa::path(
    post,
    path = "/v1/admin/webhook-events/{event_id}/replay",
    tag = "Admin",
    params(("event_id" = String, Path, description = "Webhook event ID")),
    responses(
        (status = 200, description = "Event reprocessed", body = WebhookEventRecord),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Event not found"),
        (status = 502, description = "Reprocessing failed; error recorded on the event")
    )
)]
pub async fn replay_webhook_event(
    AdminOnly(_admin): AdminOnly,
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<WebhookEventRecord>, ApiError> {
    match replay_event(&state, &event_id).await {
        Ok(event) => Ok(Json(event)),
        Err(crate::webhooks::WebhookError::Ledger(error)) => Err(error.into()),
        Err(error) => Err(ApiError::new(
            axum::http::StatusCode::BAD_GATEWAY,
            format!("replay failed: {error}"),
        )),
    }
}
