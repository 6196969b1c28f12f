use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Category;
use crate::worker::BatchSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.poll.batch_size,
            categories: self.poll.eligible_categories.clone(),
            claim_enabled: self.claim.enabled,
            max_attempts: self.claim.max_attempts,
            lease: Duration::from_secs(self.claim.lease_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Hosted Supabase table reached through PostgREST.
    Postgrest {
        url: String,
        #[serde(default = "default_table")]
        table: String,
        #[serde(default)]
        service_key: Option<String>,
        #[serde(default)]
        service_key_file: Option<String>,
        #[serde(default = "default_service_key_env_var")]
        service_key_env_var: Option<String>,
        #[serde(default = "default_store_timeout_secs")]
        timeout_secs: u64,
    },
    /// Local SQLite file; `path` defaults to `~/.festival-ocr/staged.db`.
    Sqlite {
        #[serde(default)]
        path: Option<String>,
    },
}

fn default_table() -> String {
    "staged_contents".to_string()
}

fn default_service_key_env_var() -> Option<String> {
    Some("SUPABASE_SERVICE_ROLE_KEY".to_string())
}

fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum OcrConfig {
    GoogleVision {
        #[serde(default = "default_vision_endpoint")]
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        api_key_file: Option<String>,
        #[serde(default = "default_vision_key_env_var")]
        api_key_env_var: Option<String>,
        #[serde(default)]
        language_hints: Vec<String>,
        #[serde(default = "default_ocr_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
    },
    /// Requires the `tesseract` cargo feature.
    Tesseract {
        #[serde(default = "default_tesseract_languages")]
        languages: Vec<String>,
    },
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig::GoogleVision {
            endpoint: default_vision_endpoint(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_vision_key_env_var(),
            language_hints: Vec::new(),
            timeout_secs: default_ocr_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_vision_endpoint() -> String {
    crate::ocr::vision::DEFAULT_ENDPOINT.to_string()
}

fn default_vision_key_env_var() -> Option<String> {
    Some("GOOGLE_VISION_API_KEY".to_string())
}

fn default_ocr_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_tesseract_languages() -> Vec<String> {
    vec!["kor".to_string(), "eng".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "Category::ocr_defaults")]
    pub eligible_categories: Vec<Category>,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_batch_size() -> usize {
    3
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            eligible_categories: Category::ocr_defaults(),
        }
    }
}

/// Claim step settings. Against the hosted table, claims need the columns
/// from `festival-ocr --print-supabase-sql`; disable them otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lease_secs() -> u64 {
    600
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            lease_secs: default_lease_secs(),
        }
    }
}
