// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::providers::ProviderError;
use crate::storage::LedgerError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        match &error {
            LedgerError::InvalidAmount(_) => ApiError::unprocessable(error.to_string()),
            LedgerError::InsufficientFunds | LedgerError::InsufficientLockedFunds => {
                ApiError::bad_request(error.to_string())
            }
            LedgerError::InvalidStatusTransition { .. } => ApiError::conflict(error.to_string()),
            LedgerError::NotFound(_) => ApiError::not_found(error.to_string()),
            LedgerError::AlreadyExists(_) => ApiError::conflict(error.to_string()),
            _ => ApiError::internal(error.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(error: ProviderError) -> Self {
        match &error {
            ProviderError::ConfigurationMissing(_) => {
                ApiError::service_unavailable(error.to_string())
            }
            ProviderError::Unsupported(_) => ApiError::bad_request(error.to_string()),
            ProviderError::Auth(_)
            | ProviderError::RequestFailed(_)
            | ProviderError::ResponseMalformed(_) => {
                ApiError::service_unavailable(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.message, "bad");
    }

    #[test]
    fn ledger_errors_map_to_caller_visible_statuses() {
        let invalid: ApiError = LedgerError::InvalidAmount("credits must be positive".into()).into();
        assert_eq!(invalid.status, StatusCode::UNPROCESSABLE_ENTITY);

        let funds: ApiError = LedgerError::InsufficientFunds.into();
        assert_eq!(funds.status, StatusCode::BAD_REQUEST);

        let transition: ApiError = LedgerError::InvalidStatusTransition {
            from: "paid".into(),
            to: "failed".into(),
        }
        .into();
        assert_eq!(transition.status, StatusCode::CONFLICT);

        let missing: ApiError = LedgerError::NotFound("payout x".into()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn provider_errors_map_to_service_unavailable_or_bad_request() {
        let config: ApiError = ProviderError::ConfigurationMissing("PAYPAL_SECRET".into()).into();
        assert_eq!(config.status, StatusCode::SERVICE_UNAVAILABLE);

        let unsupported: ApiError = ProviderError::Unsupported("whish".into()).into();
        assert_eq!(unsupported.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data"}"#);
    }
}
