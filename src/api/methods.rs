// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Saved payout method management.
//!
//! The sensitive payload is sealed before it is stored; clients only ever
//! get the safe projection back (label, last4, masked recipient).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::{
    api::identity::Caller,
    error::ApiError,
    providers::ProviderKind,
    state::AppState,
    storage::{safe_details, MethodCipher, PayoutMethodRecord},
};

/// Request body for saving a payout method.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateMethodBody {
    /// Provider this destination routes through.
    pub provider: ProviderKind,
    /// Routing method, e.g. `paypal_email` or `bank_transfer`.
    pub method: String,
    /// Display label shown back to the user.
    pub label: String,
    /// Recipient identifier (PayPal email for `paypal_email`).
    #[serde(default)]
    pub receiver: Option<String>,
    /// Last four digits of an account number, for display.
    #[serde(default)]
    pub last4: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Payout method representation returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct MethodResponse {
    pub method_id: String,
    pub provider: ProviderKind,
    pub method: String,
    pub is_default: bool,
    pub is_verified: bool,
    /// Safe projection of the sealed details.
    #[schema(value_type = Object)]
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Method list response.
#[derive(Debug, Serialize, ToSchema)]
pub struct MethodListResponse {
    pub methods: Vec<MethodResponse>,
    pub total: usize,
}

fn cipher(state: &AppState) -> Result<&MethodCipher, ApiError> {
    state
        .settings
        .method_cipher
        .as_deref()
        .ok_or_else(|| {
            ApiError::service_unavailable(
                "Payout methods are disabled. Set METHOD_DETAILS_KEY.",
            )
        })
}

fn to_response(cipher: &MethodCipher, record: &PayoutMethodRecord) -> MethodResponse {
    let details = cipher
        .open(&record.details_encrypted)
        .map(|details| safe_details(&details))
        .unwrap_or_else(|_| json!({}));
    MethodResponse {
        method_id: record.method_id.clone(),
        provider: record.provider,
        method: record.method.clone(),
        is_default: record.is_default,
        is_verified: record.is_verified,
        details,
        created_at: record.created_at,
    }
}

fn validate_body(body: &CreateMethodBody) -> Result<(), ApiError> {
    if !body.provider.supports_payouts() {
        return Err(ApiError::bad_request(format!(
            "{} does not process payouts",
            body.provider
        )));
    }
    if body.method.trim().is_empty() {
        return Err(ApiError::bad_request("method is required"));
    }
    if body.label.trim().is_empty() || body.label.len() > 80 {
        return Err(ApiError::bad_request("label must be 1-80 characters"));
    }
    if let Some(last4) = body.last4.as_deref() {
        if last4.len() != 4 || !last4.chars().all(|c| c.is_ascii_digit()) {
            return Err(ApiError::bad_request("last4 must be exactly 4 digits"));
        }
    }
    if body.provider == ProviderKind::Paypal {
        let receiver = body.receiver.as_deref().unwrap_or("").trim();
        if receiver.is_empty() || !receiver.contains('@') {
            return Err(ApiError::bad_request(
                "PayPal methods require a receiver email",
            ));
        }
    }
    Ok(())
}

/// List the caller's payout methods.
#[utoipa::path(
    get,
    path = "/v1/payout-methods",
    tag = "PayoutMethods",
    responses(
        (status = 200, description = "Saved payout methods", body = MethodListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Method storage not configured")
    )
)]
pub async fn list_methods(
    Caller(user): Caller,
    State(state): State<AppState>,
) -> Result<Json<MethodListResponse>, ApiError> {
    let cipher = cipher(&state)?;
    let methods: Vec<MethodResponse> = state
        .db
        .list_payout_methods(&user.user_id)?
        .iter()
        .map(|record| to_response(cipher, record))
        .collect();
    Ok(Json(MethodListResponse {
        total: methods.len(),
        methods,
    }))
}

/// Save a payout method. The first method for a provider becomes the
/// default automatically.
#[utoipa::path(
    post,
    path = "/v1/payout-methods",
    tag = "PayoutMethods",
    request_body = CreateMethodBody,
    responses(
        (status = 201, description = "Payout method saved", body = MethodResponse),
        (status = 400, description = "Invalid method details"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Method storage not configured")
    )
)]
pub async fn create_method(
    Caller(user): Caller,
    State(state): State<AppState>,
    Json(body): Json<CreateMethodBody>,
) -> Result<(StatusCode, Json<MethodResponse>), ApiError> {
    validate_body(&body)?;
    let cipher = cipher(&state)?;

    let mut details = serde_json::Map::new();
    details.insert("label".to_string(), json!(body.label.trim()));
    if let Some(receiver) = body.receiver.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        details.insert("receiver".to_string(), json!(receiver));
    }
    if let Some(last4) = body.last4.as_deref() {
        details.insert("last4".to_string(), json!(last4));
    }

    let sealed = cipher
        .seal(&Value::Object(details))
        .map_err(|e| ApiError::internal(format!("Failed to seal method details: {e}")))?;

    let record = state.db.insert_payout_method(PayoutMethodRecord::new(
        &user.user_id,
        body.provider,
        body.method.trim(),
        sealed,
        body.is_default,
    ))?;

    Ok((StatusCode::CREATED, Json(to_response(cipher, &record))))
}

/// Make a saved method the default for its provider.
#[utoipa::path(
    post,
    path = "/v1/payout-methods/{method_id}/default",
    tag = "PayoutMethods",
    params(("method_id" = String, Path, description = "Payout method ID")),
    responses(
        (status = 200, description = "Default updated", body = MethodResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Method not found")
    )
)]
pub async fn set_default_method(
    Caller(user): Caller,
    State(state): State<AppState>,
    Path(method_id): Path<String>,
) -> Result<Json<MethodResponse>, ApiError> {
    let cipher = cipher(&state)?;
    let record = state
        .db
        .set_default_payout_method(&user.user_id, &method_id)?;
    Ok(Json(to_response(cipher, &record)))
}

/// Delete a saved payout method.
#[utoipa::path(
    delete,
    path = "/v1/payout-methods/{method_id}",
    tag = "PayoutMethods",
    params(("method_id" = String, Path, description = "Payout method ID")),
    responses(
        (status = 204, description = "Method deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Method not found")
    )
)]
pub async fn delete_method(
    Caller(user): Caller,
    State(state): State<AppState>,
    Path(method_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.db.delete_payout_method(&user.user_id, &method_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(provider: ProviderKind, receiver: Option<&str>) -> CreateMethodBody {
        CreateMethodBody {
            provider,
            method: "paypal_email".to_string(),
            label: "Main".to_string(),
            receiver: receiver.map(str::to_string),
            last4: None,
            is_default: false,
        }
    }

    #[test]
    fn paypal_methods_require_a_receiver_email() {
        assert!(validate_body(&body(ProviderKind::Paypal, Some("a@b.c"))).is_ok());
        assert!(validate_body(&body(ProviderKind::Paypal, None)).is_err());
        assert!(validate_body(&body(ProviderKind::Paypal, Some("not-an-email"))).is_err());
    }

    #[test]
    fn deposit_only_providers_are_rejected() {
        assert!(validate_body(&body(ProviderKind::Whish, Some("a@b.c"))).is_err());
    }

    #[test]
    fn last4_must_be_four_digits() {
        let mut method = body(ProviderKind::Manual, None);
        method.method = "bank_transfer".to_string();
        method.last4 = Some("12a4".to_string());
        assert!(validate_body(&method).is_err());
        method.last4 = Some("1234".to_string());
        assert!(validate_body(&method).is_ok());
    }
}
