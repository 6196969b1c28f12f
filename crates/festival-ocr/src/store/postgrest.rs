//! Record store backed by a Supabase (PostgREST) table over HTTPS.
//!
//! With claim tracking on, the table needs the `ocr_attempts`,
//! `ocr_claimed_at` and `ocr_error` columns from [`CLAIM_COLUMNS_SQL`]
//! (`festival-ocr --print-supabase-sql`). Tables that only carry
//! `raw_data` and `ocr_status` must run with claims off.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};

use super::{format_timestamp, RecordStore, RecordUpdate, SelectionFilter, StoreError};
use crate::model::{OcrStatus, RecordId, StagedContent};

const MAX_ERROR_BODY_LENGTH: usize = 200;

/// DDL adding the claim columns to the hosted `staged_contents` table.
pub const CLAIM_COLUMNS_SQL: &str = include_str!("sql/supabase_claim_columns.sql");

pub struct PostgrestStore {
    client: Client,
    table_url: String,
    service_key: SecretString,
    /// Whether the table carries `ocr_attempts`, `ocr_claimed_at` and
    /// `ocr_error`. Without them only `raw_data` and `ocr_status` are written.
    track_claims: bool,
}

impl PostgrestStore {
    /// `base_url` is the project URL, e.g. `https://abc.supabase.co`.
    pub fn new(
        base_url: &str,
        table: &str,
        service_key: SecretString,
        track_claims: bool,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            table_url: table_url(base_url, table),
            service_key,
            track_claims,
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let key = self.service_key.expose_secret();
        request
            .header("apikey", key)
            .header("Authorization", format!("Bearer {}", key))
    }

    fn patch(&self, query: &[(String, String)], body: &Value) -> Result<Vec<Value>, StoreError> {
        let response = self
            .authorized(self.client.patch(&self.table_url))
            .query(query)
            .header("Prefer", "return=representation")
            .json(body)
            .send()?;
        read_json(response)
    }
}

impl RecordStore for PostgrestStore {
    fn select(&self, filter: &SelectionFilter) -> Result<Vec<StagedContent>, StoreError> {
        if filter.category_in.is_empty() || filter.limit == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .authorized(self.client.get(&self.table_url))
            .query(&selection_query(filter))
            .send()?;

        let rows = read_json(response).map_err(|e| {
            if self.track_claims && matches!(e, StoreError::Status { status: 400, .. }) {
                log::error!(
                    "Selection rejected; if the table lacks the claim columns, apply \
                     `festival-ocr --print-supabase-sql` or set FESTIVAL_OCR_CLAIMS=off"
                );
            }
            e
        })?;

        rows
            .into_iter()
            .map(|row| {
                let id = row.get("id").map(Value::to_string).unwrap_or_default();
                serde_json::from_value(row).map_err(|e| StoreError::Decode {
                    id,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn claim(&self, record: &StagedContent, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let query = vec![
            ("id".to_string(), format!("eq.{}", record.id)),
            ("ocr_attempts".to_string(), format!("eq.{}", record.ocr_attempts)),
            (
                "or".to_string(),
                "(ocr_status.is.null,ocr_status.eq.PROCESSING)".to_string(),
            ),
        ];
        let body = json!({
            "ocr_status": "PROCESSING",
            "ocr_attempts": record.ocr_attempts + 1,
            "ocr_claimed_at": format_timestamp(now),
        });
        Ok(self.patch(&query, &body)?.len() == 1)
    }

    fn update(&self, id: &RecordId, update: &RecordUpdate) -> Result<(), StoreError> {
        let rows = self.patch(&update_query(id, update), &update_body(update, self.track_claims))?;
        if rows.is_empty() {
            return Err(match update.claimed_attempts {
                Some(_) => StoreError::ClaimLost(id.to_string()),
                None => StoreError::NotFound(id.to_string()),
            });
        }
        Ok(())
    }
}

fn table_url(base_url: &str, table: &str) -> String {
    format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table)
}

/// Query parameters for the pickup `GET`.
fn selection_query(filter: &SelectionFilter) -> Vec<(String, String)> {
    let categories: Vec<&str> = filter.category_in.iter().map(|c| c.as_str()).collect();
    let mut query = vec![
        ("select".to_string(), "*".to_string()),
        ("category".to_string(), format!("in.({})", categories.join(","))),
    ];

    if filter.status_is_null {
        match filter.reclaim_claimed_before {
            Some(before) => query.push((
                "or".to_string(),
                format!(
                    "(ocr_status.is.null,and(ocr_status.eq.PROCESSING,ocr_claimed_at.lt.{}))",
                    format_timestamp(before)
                ),
            )),
            None => query.push(("ocr_status".to_string(), "is.null".to_string())),
        }
    }

    query.push(("order".to_string(), "created_at.asc".to_string()));
    query.push(("limit".to_string(), filter.limit.to_string()));
    query
}

fn update_query(id: &RecordId, update: &RecordUpdate) -> Vec<(String, String)> {
    let mut query = vec![("id".to_string(), format!("eq.{}", id))];
    if let Some(attempts) = update.claimed_attempts {
        query.push(("ocr_status".to_string(), "eq.PROCESSING".to_string()));
        query.push(("ocr_attempts".to_string(), format!("eq.{}", attempts)));
    }
    query
}

fn update_body(update: &RecordUpdate, track_claims: bool) -> Value {
    let mut body = Map::new();
    if let Some(raw_data) = &update.raw_data {
        body.insert("raw_data".to_string(), raw_data.clone());
    }
    body.insert(
        "ocr_status".to_string(),
        update
            .ocr_status
            .map(|s| Value::String(s.as_str().to_string()))
            .unwrap_or(Value::Null),
    );
    if track_claims {
        body.insert(
            "ocr_error".to_string(),
            update.ocr_error.clone().map(Value::String).unwrap_or(Value::Null),
        );
        body.insert("ocr_claimed_at".to_string(), Value::Null);
        if update.ocr_status == Some(OcrStatus::Done) {
            body.insert("ocr_attempts".to_string(), json!(0));
        }
    }
    Value::Object(body)
}

fn read_json(response: Response) -> Result<Vec<Value>, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        let body = if body.len() > MAX_ERROR_BODY_LENGTH {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated)", &body[..end])
        } else {
            body
        };
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json()?)
}
