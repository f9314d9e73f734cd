// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

//! Append-only audit store for inbound provider callbacks.
//!
//! Every callback is persisted verbatim (headers + payload) BEFORE any
//! parsing or signature verification, so a crash mid-processing always
//! leaves a replayable record. Rows are never deleted; `processed` /
//! `processing_error` track what happened to each one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::ledger_db::{
    get_json, put_json, scan_json, BlobTable, LedgerDb, LedgerError, LedgerResult, WEBHOOK_EVENTS,
};
use crate::providers::ProviderKind;

/// Persisted inbound callback.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEventRecord {
    /// Unique event identifier (UUID), assigned at ingestion.
    pub event_id: String,
    /// Provider that delivered the callback.
    pub provider: ProviderKind,
    /// Provider's event type string (e.g. `PAYMENT.CAPTURE.COMPLETED`).
    pub event_type: String,
    /// Provider's own event/transmission id, for duplicate spotting.
    pub external_id: String,
    /// Raw request headers (lowercased names).
    pub headers: BTreeMap<String, String>,
    /// Raw request payload. A string value when the body was not JSON.
    #[schema(value_type = Object)]
    pub payload: Value,
    /// Whether business-logic processing completed.
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Error recorded by a failed processing attempt, kept for triage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl WebhookEventRecord {
    pub fn new(
        provider: ProviderKind,
        event_type: impl Into<String>,
        external_id: impl Into<String>,
        headers: BTreeMap<String, String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            provider,
            event_type: event_type.into(),
            external_id: external_id.into(),
            headers,
            payload,
            processed: false,
            processed_at: None,
            processing_error: None,
            received_at: Utc::now(),
        }
    }
}

/// Flag an event processed inside an open transaction, so the flag commits
/// atomically with the state change the event caused.
pub(crate) fn mark_event_processed_in(
    table: &mut BlobTable<'_>,
    event_id: &str,
) -> LedgerResult<()> {
    let mut record: WebhookEventRecord = get_json(table, event_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("webhook event {event_id}")))?;
    record.processed = true;
    record.processed_at = Some(Utc::now());
    record.processing_error = None;
    put_json(table, event_id, &record)
}

impl LedgerDb {
    /// Persist a new event (always before processing).
    pub fn insert_webhook_event(&self, record: &WebhookEventRecord) -> LedgerResult<()> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(WEBHOOK_EVENTS)?;
            put_json(&mut table, &record.event_id, record)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get an event by ID.
    pub fn webhook_event(&self, event_id: &str) -> LedgerResult<WebhookEventRecord> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(WEBHOOK_EVENTS)?;
        get_json(&table, event_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("webhook event {event_id}")))
    }

    /// Recent events, newest first, optionally filtered by processed flag.
    pub fn list_webhook_events(
        &self,
        processed: Option<bool>,
        limit: usize,
    ) -> LedgerResult<Vec<WebhookEventRecord>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(WEBHOOK_EVENTS)?;
        let mut records: Vec<WebhookEventRecord> = scan_json(&table)?
            .into_iter()
            .filter(|record: &WebhookEventRecord| {
                processed.is_none_or(|wanted| record.processed == wanted)
            })
            .collect();
        records.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Flag an event processed in its own transaction (used when the event
    /// caused no state change).
    pub fn mark_webhook_processed(&self, event_id: &str) -> LedgerResult<()> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(WEBHOOK_EVENTS)?;
            mark_event_processed_in(&mut table, event_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Record a processing failure; the event stays available for replay.
    pub fn record_webhook_error(&self, event_id: &str, error: &str) -> LedgerResult<()> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(WEBHOOK_EVENTS)?;
            let mut record: WebhookEventRecord = get_json(&table, event_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("webhook event {event_id}")))?;
            record.processing_error = Some(error.to_string());
            put_json(&mut table, event_id, &record)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, LedgerDb) {
        let temp = TempDir::new().unwrap();
        let db = LedgerDb::open(&temp.path().join("ledger.redb")).unwrap();
        (temp, db)
    }

    fn sample_event(external_id: &str) -> WebhookEventRecord {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        WebhookEventRecord::new(
            ProviderKind::Paypal,
            "PAYMENT.CAPTURE.COMPLETED",
            external_id,
            headers,
            json!({"id": external_id}),
        )
    }

    #[test]
    fn events_persist_verbatim_before_processing() {
        let (_temp, db) = open_db();
        let event = sample_event("wh-1");
        db.insert_webhook_event(&event).unwrap();

        let loaded = db.webhook_event(&event.event_id).unwrap();
        assert!(!loaded.processed);
        assert_eq!(loaded.payload, json!({"id": "wh-1"}));
        assert_eq!(
            loaded.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn mark_processed_clears_previous_error() {
        let (_temp, db) = open_db();
        let event = sample_event("wh-2");
        db.insert_webhook_event(&event).unwrap();

        db.record_webhook_error(&event.event_id, "boom").unwrap();
        let failed = db.webhook_event(&event.event_id).unwrap();
        assert_eq!(failed.processing_error.as_deref(), Some("boom"));
        assert!(!failed.processed);

        db.mark_webhook_processed(&event.event_id).unwrap();
        let processed = db.webhook_event(&event.event_id).unwrap();
        assert!(processed.processed);
        assert!(processed.processed_at.is_some());
        assert!(processed.processing_error.is_none());
    }

    #[test]
    fn listing_filters_on_processed_flag() {
        let (_temp, db) = open_db();
        let one = sample_event("wh-3");
        let two = sample_event("wh-4");
        db.insert_webhook_event(&one).unwrap();
        db.insert_webhook_event(&two).unwrap();
        db.mark_webhook_processed(&one.event_id).unwrap();

        let unprocessed = db.list_webhook_events(Some(false), 10).unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].event_id, two.event_id);

        let all = db.list_webhook_events(None, 10).unwrap();
        assert_eq!(all.len(), 2);
    }
}
