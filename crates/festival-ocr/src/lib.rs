pub mod app;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod model;
pub mod ocr;
pub mod secrets;
pub mod store;
pub mod worker;

pub use app::build_poll_loop;
pub use config::{load_config, load_default_config, WorkerConfig};
pub use error::{ConfigError, FetchError, OcrError, RecordError, Result, WorkerError};
pub use fetcher::{HttpImageFetcher, ImageFetcher};
pub use model::{Category, OcrStatus, RecordId, StagedContent};
pub use ocr::{extract_text, OcrBackend};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use store::{PostgrestStore, RecordStore, SqliteStore, StoreError};
pub use worker::{BatchProcessor, BatchSettings, CycleReport, PollLoop, RecordOutcome};
