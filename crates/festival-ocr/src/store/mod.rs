//! Access to the `staged_contents` table.
//!
//! [`RecordStore`] is the seam between the batch processor and storage.
//! Two implementations ship: [`SqliteStore`] for local runs and tests, and
//! [`PostgrestStore`] for the hosted Supabase table.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{Category, OcrStatus, RecordId, StagedContent};

pub mod error;
pub mod migrations;
pub mod postgrest;
pub mod sqlite;

pub use error::StoreError;
pub use postgrest::{PostgrestStore, CLAIM_COLUMNS_SQL};
pub use sqlite::{default_database_path, SqliteStore};

/// Which rows a polling cycle may pick up.
#[derive(Debug, Clone)]
pub struct SelectionFilter {
    /// Only rows whose `ocr_status` is unset.
    pub status_is_null: bool,
    pub category_in: Vec<Category>,
    pub limit: usize,
    /// Also return `PROCESSING` rows claimed before this instant, so a worker
    /// that died mid-record does not strand its rows.
    pub reclaim_claimed_before: Option<DateTime<Utc>>,
}

impl SelectionFilter {
    pub fn pending(category_in: Vec<Category>, limit: usize) -> Self {
        Self {
            status_is_null: true,
            category_in,
            limit,
            reclaim_claimed_before: None,
        }
    }
}

/// Fields written by [`RecordStore::update`].
///
/// `ocr_status` is always written (`None` clears it); `raw_data` only when
/// present. Every update also releases the claim timestamp, and a `DONE`
/// write resets `ocr_attempts` so a later re-queue starts from zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub raw_data: Option<Value>,
    pub ocr_status: Option<OcrStatus>,
    pub ocr_error: Option<String>,
    /// When set, the write only applies while the row is still `PROCESSING`
    /// with exactly this many attempts, i.e. still held by our claim.
    pub claimed_attempts: Option<u32>,
}

impl RecordUpdate {
    /// Terminal success: results written, status `DONE`.
    pub fn done(raw_data: Value) -> Self {
        Self {
            raw_data: Some(raw_data),
            ocr_status: Some(OcrStatus::Done),
            ocr_error: None,
            claimed_attempts: None,
        }
    }

    /// Put the row back into the eligible pool.
    pub fn retry(error: impl Into<String>) -> Self {
        Self {
            raw_data: None,
            ocr_status: None,
            ocr_error: Some(error.into()),
            claimed_attempts: None,
        }
    }

    /// Give up on the row.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            raw_data: None,
            ocr_status: Some(OcrStatus::Failed),
            ocr_error: Some(error.into()),
            claimed_attempts: None,
        }
    }

    /// Scopes the write to the claim that set `ocr_attempts` to `attempts`.
    pub fn fenced(mut self, attempts: u32) -> Self {
        self.claimed_attempts = Some(attempts);
        self
    }
}

pub trait RecordStore: Send + Sync {
    fn select(&self, filter: &SelectionFilter) -> Result<Vec<StagedContent>, StoreError>;

    /// Atomically moves `record` to `PROCESSING` if nobody else has touched
    /// it since it was selected. Returns `true` only when this call won.
    fn claim(&self, record: &StagedContent, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Writes `update` to the row. A fenced update whose claim has been
    /// taken over fails with [`StoreError::ClaimLost`] and changes nothing.
    fn update(&self, id: &RecordId, update: &RecordUpdate) -> Result<(), StoreError>;
}

/// Timestamps are stored as fixed-width UTC strings so they sort as text.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
