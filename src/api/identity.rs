// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Caller identity extractors.
//!
//! Authentication lives upstream: the API gateway validates the session and
//! forwards the resolved identity as `X-User-Id` / `X-User-Role` headers.
//! This service only reads those headers; it must never be exposed without
//! the gateway in front of it. Webhook receivers are the exception — they
//! carry no identity and authenticate by provider signature instead.
//!
//! ```rust,ignore
//! async fn my_handler(Caller(user): Caller) -> impl IntoResponse {
//!     // user.user_id, user.role
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;

/// Header carrying the gateway-resolved user id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the gateway-resolved role.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Caller roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Platform operator: approves payouts, collects fees, triages events.
    Admin,
    /// Normal marketplace user.
    Member,
}

impl Role {
    /// Parse a role header value. Anything unrecognized is a plain member:
    /// privileges are never guessed upward.
    pub fn from_header(raw: &str) -> Role {
        if raw.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Member
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// A resolved caller identity.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

fn identity_from_parts(parts: &Parts) -> Result<Identity, ApiError> {
    let user_id = parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing caller identity"))?
        .to_string();

    let role = parts
        .headers
        .get(USER_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(Role::from_header)
        .unwrap_or(Role::Member);

    Ok(Identity { user_id, role })
}

/// Extractor for any authenticated caller.
pub struct Caller(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_parts(parts).map(Caller)
    }
}

/// Extractor that additionally requires the admin role.
pub struct AdminOnly(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for AdminOnly {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = identity_from_parts(parts)?;
        if !identity.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminOnly(identity))
    }
}
