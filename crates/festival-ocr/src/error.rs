use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Required environment variable '{0}' is not set")]
    MissingEnv(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid image URL '{0}'")]
    InvalidUrl(String),

    #[error("Request for '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read body of '{url}': {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Image '{url}' exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to build OCR client: {0}")]
    Client(String),

    #[error("OCR request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OCR backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed OCR response: {0}")]
    MalformedResponse(String),

    #[error("OCR backend rejected the image: {0}")]
    Rejected(String),

    #[error("OCR engine failed: {0}")]
    Engine(String),
}

/// Errors that abort a single record but never the rest of the batch.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Malformed raw_data: {0}")]
    MalformedRawData(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Record processing panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
