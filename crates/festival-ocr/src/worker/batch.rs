use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info_span;

use crate::error::{FetchError, RecordError};
use crate::fetcher::ImageFetcher;
use crate::model::{
    apply_ocr_output, resolve_images, Category, FailureReason, ImageDescriptor, ImageFailure,
    OcrResultEntry, OcrStatus, StagedContent,
};
use crate::ocr::{try_extract_text, OcrBackend};
use crate::store::{RecordStore, RecordUpdate, SelectionFilter, StoreError};

use super::panic_message;

/// Per-cycle knobs for the batch processor.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub categories: Vec<Category>,
    /// Claim rows before processing them. Off reproduces the plain
    /// unset/DONE lifecycle for tables without the claim columns.
    pub claim_enabled: bool,
    pub max_attempts: u32,
    /// How long a `PROCESSING` claim is honoured before the row is reselected.
    pub lease: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 3,
            categories: Category::ocr_defaults(),
            claim_enabled: true,
            max_attempts: 3,
            lease: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Completed {
        entries: Vec<OcrResultEntry>,
        failures: Vec<ImageFailure>,
    },
    /// Another worker claimed the row, before our claim or before our commit.
    SkippedClaimLost,
    /// A stale claim had already used all of its attempts; marked `FAILED`.
    GaveUp,
}

/// Counters for one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub completed: usize,
    pub skipped: usize,
    pub gave_up: usize,
    pub errored: usize,
    pub images_with_text: usize,
    pub images_failed: usize,
}

pub struct BatchProcessor {
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn ImageFetcher>,
    ocr: Arc<dyn OcrBackend>,
    settings: BatchSettings,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn ImageFetcher>,
        ocr: Arc<dyn OcrBackend>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            ocr,
            settings,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Runs one polling cycle: select a batch and process each record on its own.
    ///
    /// Only a failed selection is returned as an error. Record-level failures
    /// are logged, counted, and never stop the rest of the batch.
    pub fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let _span = info_span!("ocr_cycle").entered();

        let records = self.store.select(&self.selection_filter())?;
        if records.is_empty() {
            log::info!("No staged contents waiting for OCR");
            return Ok(CycleReport::default());
        }

        let mut report = CycleReport {
            selected: records.len(),
            ..Default::default()
        };

        for record in &records {
            let _record_span = info_span!("ocr_record",
                id = %record.id,
                category = %record.category,
            )
            .entered();

            match self.process_record(record) {
                Ok(RecordOutcome::Completed { entries, failures }) => {
                    report.completed += 1;
                    report.images_with_text += entries.len();
                    report.images_failed += failures.len();
                }
                Ok(RecordOutcome::SkippedClaimLost) => report.skipped += 1,
                Ok(RecordOutcome::GaveUp) => report.gave_up += 1,
                Err(e) => {
                    report.errored += 1;
                    log::error!("Record {} failed: {}", record.id, e);
                }
            }
        }

        log::info!(
            "Cycle finished: {} selected, {} done, {} skipped, {} gave up, {} errored",
            report.selected,
            report.completed,
            report.skipped,
            report.gave_up,
            report.errored
        );

        Ok(report)
    }

    /// Claims (when enabled), OCRs and commits a single record.
    ///
    /// Writes after the claim are fenced by it, so a worker whose lease was
    /// taken over commits nothing. On error or panic the row is released
    /// again: back to unset while attempts remain, `FAILED` once they are
    /// used up.
    pub fn process_record(&self, record: &StagedContent) -> Result<RecordOutcome, RecordError> {
        let fence = if self.settings.claim_enabled {
            if record.ocr_status == Some(OcrStatus::Processing)
                && record.ocr_attempts >= self.settings.max_attempts
            {
                return self.give_up(record);
            }

            if !self.store.claim(record, Utc::now())? {
                log::info!("Record {} was claimed by another worker", record.id);
                return Ok(RecordOutcome::SkippedClaimLost);
            }
            Some(record.ocr_attempts + 1)
        } else {
            None
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.ocr_record(record, fence)))
            .unwrap_or_else(|payload| Err(RecordError::Panicked(panic_message(&*payload))));

        match result {
            Err(RecordError::Store(StoreError::ClaimLost(_))) => {
                log::warn!(
                    "Claim on record {} was taken over before commit, dropping result",
                    record.id
                );
                Ok(RecordOutcome::SkippedClaimLost)
            }
            Err(e) => {
                self.release(record, fence, &e);
                Err(e)
            }
            ok => ok,
        }
    }

    /// A stale claim that already used every attempt: mark it `FAILED`
    /// without doing any work.
    fn give_up(&self, record: &StagedContent) -> Result<RecordOutcome, RecordError> {
        log::warn!(
            "Record {} already used {} attempts, marking FAILED",
            record.id,
            record.ocr_attempts
        );
        let update = RecordUpdate::failed(format!(
            "attempt limit of {} reached",
            self.settings.max_attempts
        ))
        .fenced(record.ocr_attempts);

        match self.store.update(&record.id, &update) {
            Ok(()) => Ok(RecordOutcome::GaveUp),
            Err(StoreError::ClaimLost(_)) => Ok(RecordOutcome::SkippedClaimLost),
            Err(e) => Err(e.into()),
        }
    }

    fn selection_filter(&self) -> SelectionFilter {
        let mut filter =
            SelectionFilter::pending(self.settings.categories.clone(), self.settings.batch_size);
        if self.settings.claim_enabled {
            filter.reclaim_claimed_before = chrono::Duration::from_std(self.settings.lease)
                .ok()
                .map(|lease| Utc::now() - lease);
        }
        filter
    }

    fn ocr_record(
        &self,
        record: &StagedContent,
        fence: Option<u32>,
    ) -> Result<RecordOutcome, RecordError> {
        log::info!(
            "Target: {} ({})",
            record.festival_name().unwrap_or("<unnamed>"),
            record.category
        );

        let images = resolve_images(&record.raw_data)?;
        let (entries, failures) = self.ocr_images(&images);

        let raw_data = apply_ocr_output(&record.raw_data, &entries, &failures)?;
        let mut update = RecordUpdate::done(raw_data);
        update.claimed_attempts = fence;
        self.store.update(&record.id, &update)?;

        log::info!(
            "Saved OCR result for {} ({} of {} images with text)",
            record.id,
            entries.len(),
            images.len()
        );

        Ok(RecordOutcome::Completed { entries, failures })
    }

    /// OCRs each image in order. Images without a URL are skipped outright;
    /// the rest end up either as an entry or as a failure.
    fn ocr_images(&self, images: &[ImageDescriptor]) -> (Vec<OcrResultEntry>, Vec<ImageFailure>) {
        let mut entries = Vec::new();
        let mut failures = Vec::new();

        for (index, image) in images.iter().enumerate() {
            let Some(url) = image.url.as_deref() else {
                continue;
            };

            log::info!(
                "  Image {}/{}: requesting {}",
                index + 1,
                images.len(),
                self.ocr.engine()
            );

            match self.ocr_image(url) {
                Ok(texts) => {
                    log::info!(
                        "  -> extracted {} lines, first: {}",
                        texts.len(),
                        texts.first().map(String::as_str).unwrap_or("")
                    );
                    entries.push(OcrResultEntry {
                        image_index: index,
                        url: url.to_string(),
                        texts,
                        engine: self.ocr.engine().to_string(),
                    });
                }
                Err((reason, detail)) => {
                    log::warn!("  -> no text from {} ({:?})", url, reason);
                    failures.push(ImageFailure {
                        image_index: index,
                        url: url.to_string(),
                        reason,
                        detail,
                    });
                }
            }
        }

        (entries, failures)
    }

    fn ocr_image(&self, url: &str) -> Result<Vec<String>, (FailureReason, Option<String>)> {
        let bytes = self.fetcher.fetch(url).map_err(|e: FetchError| {
            log::warn!("  Image fetch failed: {}", e);
            (FailureReason::FetchFailed, Some(e.to_string()))
        })?;

        let texts = try_extract_text(self.ocr.as_ref(), &bytes).map_err(|e| {
            log::warn!("  {} OCR failed: {}", self.ocr.engine(), e);
            (FailureReason::OcrFailed, Some(e.to_string()))
        })?;

        if texts.is_empty() {
            return Err((FailureReason::NoText, None));
        }
        Ok(texts)
    }

    fn release(&self, record: &StagedContent, fence: Option<u32>, error: &RecordError) {
        let Some(attempts) = fence else {
            log::warn!(
                "Record {} left unset, it will be picked up again next cycle",
                record.id
            );
            return;
        };

        let update = if attempts >= self.settings.max_attempts {
            log::warn!("Record {} failed {} times, marking FAILED", record.id, attempts);
            RecordUpdate::failed(error.to_string())
        } else {
            RecordUpdate::retry(error.to_string())
        };

        match self.store.update(&record.id, &update.fenced(attempts)) {
            Ok(()) => {}
            Err(StoreError::ClaimLost(_)) => {
                log::info!("Record {} was reclaimed by another worker, not releasing", record.id)
            }
            Err(e) => log::error!(
                "Failed to release record {}: {} (claim expires after {:?})",
                record.id,
                e,
                self.settings.lease
            ),
        }
    }
}
