//! Turns a [`WorkerConfig`] into a ready-to-run [`PollLoop`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FetchConfig, OcrConfig, StoreConfig, WorkerConfig};
use crate::error::{ConfigError, Result};
use crate::fetcher::{HttpImageFetcher, ImageFetcher};
use crate::ocr::{GoogleVisionBackend, OcrBackend};
use crate::secrets::{resolve_secret, SecretSource};
use crate::store::{default_database_path, PostgrestStore, RecordStore, SqliteStore};
use crate::worker::{BatchProcessor, PollLoop};

pub fn build_poll_loop(config: &WorkerConfig) -> Result<PollLoop> {
    let store = build_store(&config.store, config.claim.enabled)?;
    let fetcher = build_fetcher(&config.fetch)?;
    let ocr = build_ocr(&config.ocr)?;

    log::info!(
        "Worker ready: engine={}, batch_size={}, claims={}",
        ocr.engine(),
        config.poll.batch_size,
        if config.claim.enabled { "on" } else { "off" }
    );

    let processor = BatchProcessor::new(store, fetcher, ocr, config.batch_settings());
    Ok(PollLoop::new(processor, config.poll_interval()))
}

pub fn build_store(config: &StoreConfig, track_claims: bool) -> Result<Arc<dyn RecordStore>> {
    match config {
        StoreConfig::Postgrest {
            url,
            table,
            service_key,
            service_key_file,
            service_key_env_var,
            timeout_secs,
        } => {
            let key = resolve_secret(SecretSource {
                what: "store service key",
                direct: service_key.as_deref(),
                file_path: service_key_file.as_deref(),
                env_var: service_key_env_var.as_deref(),
            })?;
            let store = PostgrestStore::new(
                url,
                table,
                key,
                track_claims,
                Duration::from_secs(*timeout_secs),
            )?;
            log::info!("Using PostgREST store at {}", store.table_url());
            if track_claims {
                log::info!(
                    "Claim tracking on: the table needs the columns from `festival-ocr --print-supabase-sql`"
                );
            }
            Ok(Arc::new(store))
        }
        StoreConfig::Sqlite { path } => {
            let path = match path {
                Some(p) => PathBuf::from(p),
                None => default_database_path().ok_or_else(|| ConfigError::Validation {
                    message: "could not determine home directory for the default database path"
                        .to_string(),
                })?,
            };
            log::info!("Using SQLite store at {}", path.display());
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
    }
}

pub fn build_fetcher(config: &FetchConfig) -> Result<Arc<dyn ImageFetcher>> {
    let fetcher = HttpImageFetcher::new(
        Duration::from_secs(config.connect_timeout_secs),
        Duration::from_secs(config.timeout_secs),
        config.max_image_bytes,
    )?;
    Ok(Arc::new(fetcher))
}

pub fn build_ocr(config: &OcrConfig) -> Result<Arc<dyn OcrBackend>> {
    match config {
        OcrConfig::GoogleVision {
            endpoint,
            api_key,
            api_key_file,
            api_key_env_var,
            language_hints,
            timeout_secs,
            connect_timeout_secs,
        } => {
            let key = resolve_secret(SecretSource {
                what: "Google Vision API key",
                direct: api_key.as_deref(),
                file_path: api_key_file.as_deref(),
                env_var: api_key_env_var.as_deref(),
            })?;
            let backend = GoogleVisionBackend::new(
                endpoint.clone(),
                key,
                language_hints.clone(),
                Duration::from_secs(*connect_timeout_secs),
                Duration::from_secs(*timeout_secs),
            )?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "tesseract")]
        OcrConfig::Tesseract { languages } => {
            Ok(Arc::new(crate::ocr::TesseractBackend::new(languages)))
        }
        #[cfg(not(feature = "tesseract"))]
        OcrConfig::Tesseract { .. } => Err(ConfigError::Validation {
            message: "ocr.engine 'tesseract' needs a build with the `tesseract` feature"
                .to_string(),
        }
        .into()),
    }
}
