//! Shared fakes for festival-ocr integration tests.
//!
//! - `MemoryStore`: a `RecordStore` with the same claim rules as the SQL stores
//! - `ScriptedFetcher` / `ScriptedOcr`: per-URL and per-image canned answers
//! - `staged` / `processor` helpers to cut boilerplate

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use festival_ocr::error::{FetchError, OcrError};
use festival_ocr::fetcher::ImageFetcher;
use festival_ocr::model::{OcrStatus, RecordId, StagedContent};
use festival_ocr::ocr::OcrBackend;
use festival_ocr::store::{RecordStore, RecordUpdate, SelectionFilter, StoreError};
use festival_ocr::worker::{BatchProcessor, BatchSettings};

pub const FAKE_ENGINE: &str = "fake_ocr";

/// Builds an unprocessed row.
pub fn staged(id: &str, category: &str, raw_data: Value) -> StagedContent {
    StagedContent {
        id: RecordId::new(id),
        category: category.to_string(),
        raw_data,
        ocr_status: None,
        ocr_attempts: 0,
        ocr_claimed_at: None,
    }
}

pub fn processor(
    store: Arc<dyn RecordStore>,
    fetcher: Arc<ScriptedFetcher>,
    ocr: Arc<ScriptedOcr>,
    settings: BatchSettings,
) -> BatchProcessor {
    BatchProcessor::new(store, fetcher, ocr, settings)
}

/// In-memory `staged_contents` that keeps insertion order.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StagedContent>>,
    errors: Mutex<HashMap<RecordId, String>>,
    updates: Mutex<Vec<(RecordId, RecordUpdate)>>,
    stolen: Mutex<HashSet<RecordId>>,
    claims: AtomicUsize,
    fail_select: AtomicBool,
}

impl MemoryStore {
    pub fn with_rows(rows: Vec<StagedContent>) -> Self {
        let store = Self::default();
        *store.rows.lock().unwrap() = rows;
        store
    }

    pub fn get(&self, id: &str) -> StagedContent {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id.as_str() == id)
            .cloned()
            .unwrap_or_else(|| panic!("no row {}", id))
    }

    pub fn last_error(&self, id: &str) -> Option<String> {
        self.errors.lock().unwrap().get(&RecordId::new(id)).cloned()
    }

    pub fn update_calls(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn updates_for(&self, id: &str) -> Vec<RecordUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(rid, _)| rid.as_str() == id)
            .map(|(_, u)| u.clone())
            .collect()
    }

    pub fn claim_calls(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    /// Makes the next claim on `id` lose, as if another worker got there first.
    pub fn steal_claim(&self, id: &str) {
        self.stolen.lock().unwrap().insert(RecordId::new(id));
    }

    pub fn fail_select(&self, fail: bool) {
        self.fail_select.store(fail, Ordering::SeqCst);
    }

    /// Puts a row back in the queue the way the admin "retry OCR" action does.
    pub fn requeue(&self, id: &str) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.id.as_str() == id) {
            row.ocr_status = None;
        }
    }
}

impl RecordStore for MemoryStore {
    fn select(&self, filter: &SelectionFilter) -> Result<Vec<StagedContent>, StoreError> {
        if self.fail_select.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 503,
                body: "store unavailable".to_string(),
            });
        }

        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| {
                filter
                    .category_in
                    .iter()
                    .any(|c| c.as_str() == r.category)
            })
            .filter(|r| {
                if !filter.status_is_null {
                    return true;
                }
                match (r.ocr_status, filter.reclaim_claimed_before) {
                    (None, _) => true,
                    (Some(OcrStatus::Processing), Some(before)) => {
                        r.ocr_claimed_at.map_or(false, |at| at < before)
                    }
                    _ => false,
                }
            })
            .take(filter.limit)
            .cloned()
            .collect())
    }

    fn claim(&self, record: &StagedContent, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.claims.fetch_add(1, Ordering::SeqCst);

        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.to_string()))?;

        if self.stolen.lock().unwrap().remove(&record.id) {
            row.ocr_attempts += 1;
            row.ocr_status = Some(OcrStatus::Processing);
            row.ocr_claimed_at = Some(now);
        }

        let claimable = matches!(row.ocr_status, None | Some(OcrStatus::Processing));
        if !claimable || row.ocr_attempts != record.ocr_attempts {
            return Ok(false);
        }

        row.ocr_status = Some(OcrStatus::Processing);
        row.ocr_attempts += 1;
        row.ocr_claimed_at = Some(now);
        Ok(true)
    }

    fn update(&self, id: &RecordId, update: &RecordUpdate) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(attempts) = update.claimed_attempts {
            if row.ocr_status != Some(OcrStatus::Processing) || row.ocr_attempts != attempts {
                return Err(StoreError::ClaimLost(id.to_string()));
            }
        }

        if let Some(raw_data) = &update.raw_data {
            row.raw_data = raw_data.clone();
        }
        row.ocr_status = update.ocr_status;
        row.ocr_claimed_at = None;
        if update.ocr_status == Some(OcrStatus::Done) {
            row.ocr_attempts = 0;
        }

        let mut errors = self.errors.lock().unwrap();
        match &update.ocr_error {
            Some(e) => errors.insert(id.clone(), e.clone()),
            None => errors.remove(id),
        };

        self.updates
            .lock()
            .unwrap()
            .push((id.clone(), update.clone()));
        Ok(())
    }
}

/// Serves bytes per URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: HashMap<String, Result<Vec<u8>, u16>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `url` returns `image` as its body.
    pub fn serve(mut self, url: &str, image: &str) -> Self {
        self.responses
            .insert(url.to_string(), Ok(image.as_bytes().to_vec()));
        self
    }

    pub fn fail(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), Err(status));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ImageFetcher for ScriptedFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.responses.get(url) {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

/// Reads image bytes as a key into canned OCR answers. Unknown images have
/// no text; the image `panic` makes the backend panic.
#[derive(Default)]
pub struct ScriptedOcr {
    answers: HashMap<String, Result<String, String>>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, image: &str, blob: &str) -> Self {
        self.answers
            .insert(image.to_string(), Ok(blob.to_string()));
        self
    }

    pub fn error(mut self, image: &str, message: &str) -> Self {
        self.answers
            .insert(image.to_string(), Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrBackend for ScriptedOcr {
    fn engine(&self) -> &str {
        FAKE_ENGINE
    }

    fn detect_document_text(&self, image: &[u8]) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = String::from_utf8_lossy(image).to_string();
        if key == "panic" {
            panic!("engine crashed on image");
        }
        match self.answers.get(&key) {
            Some(Ok(blob)) => Ok(blob.clone()),
            Some(Err(message)) => Err(OcrError::Engine(message.clone())),
            None => Ok(String::new()),
        }
    }
}
