// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Manual payout provider: the transfer happens outside the system (bank
//! transfer, cash). No network calls, no webhooks; an admin drives the
//! payout to `paid` directly.

use serde_json::json;

use super::{CreatedPayout, PayoutStatusDetails, ProviderError, RemotePayoutStatus};
use crate::storage::{PayoutRecord, PayoutStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct ManualPayout;

impl ManualPayout {
    /// Returns a synthetic reference for auditability.
    pub fn create_payout(&self, payout: &PayoutRecord) -> Result<CreatedPayout, ProviderError> {
        let reference = payout
            .provider_reference
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| format!("manual_{}", payout.payout_id));

        Ok(CreatedPayout {
            provider_reference: reference,
            raw: json!({ "note": "manual payout" }),
        })
    }

    /// The provider cannot be polled; the system's own record is the only
    /// source of truth, so anything non-terminal is inconclusive.
    pub fn get_status(&self, payout: &PayoutRecord) -> PayoutStatusDetails {
        let status = match payout.status {
            PayoutStatus::Paid => RemotePayoutStatus::Paid,
            PayoutStatus::Failed => RemotePayoutStatus::Failed,
            _ => RemotePayoutStatus::Unknown,
        };
        PayoutStatusDetails {
            status,
            failure_code: payout.failure_code.clone(),
            failure_message: payout.failure_message.clone(),
            raw: json!({ "status": payout.status.as_str() }),
        }
    }
}
