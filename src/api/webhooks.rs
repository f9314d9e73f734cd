// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Public webhook receivers.
//!
//! Order of operations is fixed: persist the callback verbatim, verify its
//! authenticity, then process. A processing failure is recorded on the
//! stored event and still ACKed with 200 — provider retry storms must not
//! amplify — while signature failures are rejected with 400 and never acted
//! upon.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{error, warn};

use crate::{
    providers::{whish::SIGNATURE_HEADER, ProviderKind},
    state::AppState,
    storage::WebhookEventRecord,
    webhooks::process_event,
};

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect()
}

fn parse_payload(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn record_error(state: &AppState, event_id: &str, message: &str) {
    if let Err(error) = state.db.record_webhook_error(event_id, message) {
        error!(event_id, %error, "failed to record webhook processing error");
    }
}

/// PayPal webhook receiver (payout items, checkout orders, captures).
pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let headers = header_map(&headers);
    let payload = parse_payload(&body);

    let event_type = payload
        .get("event_type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let external_id = payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| headers.get("paypal-transmission-id").cloned())
        .unwrap_or_default();

    // Persist before anything else: a crash below still leaves a
    // replayable record.
    let event = WebhookEventRecord::new(
        ProviderKind::Paypal,
        event_type,
        external_id,
        headers.clone(),
        payload.clone(),
    );
    if let Err(error) = state.db.insert_webhook_event(&event) {
        error!(%error, "failed to persist paypal webhook");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let Some(paypal) = state.paypal.clone() else {
        record_error(&state, &event.event_id, "provider_not_configured");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    match paypal.verify_webhook_signature(&headers, &payload).await {
        Ok(true) => {}
        Ok(false) => {
            record_error(&state, &event.event_id, "invalid_signature");
            return (StatusCode::BAD_REQUEST, "invalid").into_response();
        }
        Err(error) => {
            record_error(&state, &event.event_id, &error.to_string());
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    if let Err(error) = process_event(&state, &event).await {
        warn!(event_id = %event.event_id, %error, "paypal webhook processing failed");
        record_error(&state, &event.event_id, &error.to_string());
    }
    (StatusCode::OK, "ok").into_response()
}

/// Whish callback receiver.
pub async fn whish_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_values = header_map(&headers);
    let payload = parse_payload(&body);

    let event_type = payload
        .get("event")
        .or_else(|| payload.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let external_id = payload
        .get("id")
        .or_else(|| payload.get("transaction_id"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let event = WebhookEventRecord::new(
        ProviderKind::Whish,
        event_type,
        external_id,
        header_values.clone(),
        payload,
    );
    if let Err(error) = state.db.insert_webhook_event(&event) {
        error!(%error, "failed to persist whish webhook");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // Verify the HMAC over the raw body when the integration has a secret;
    // an unconfigured client cannot verify and accepts the callback as the
    // sandbox integration does.
    if let Some(whish) = state.whish.as_deref() {
        let provided = header_values.get(SIGNATURE_HEADER).map(String::as_str);
        if !whish.verify_signature(&body, provided) {
            record_error(&state, &event.event_id, "invalid_signature");
            return (StatusCode::BAD_REQUEST, "invalid").into_response();
        }
    }

    if let Err(error) = process_event(&state, &event).await {
        warn!(event_id = %event.event_id, %error, "whish webhook processing failed");
        record_error(&state, &event.event_id, &error.to_string());
    }
    (StatusCode::OK, "ok").into_response()
}
