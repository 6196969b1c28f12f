use std::path::Path;

use crate::config::schema::{ClaimConfig, OcrConfig, StoreConfig, WorkerConfig};
use crate::error::ConfigError;

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "FESTIVAL_OCR_CONFIG";

const SUPABASE_URL_ENVS: [&str; 2] = ["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];
const SQLITE_PATH_ENV: &str = "FESTIVAL_OCR_SQLITE_PATH";
const CLAIMS_ENV: &str = "FESTIVAL_OCR_CLAIMS";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<WorkerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<WorkerConfig, ConfigError> {
    let config: WorkerConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Builds a config from the same environment variables the hosted
/// deployment already exports. Everything not covered keeps its default.
pub fn config_from_env() -> Result<WorkerConfig, ConfigError> {
    let store = match first_env(&SUPABASE_URL_ENVS) {
        Some(url) => StoreConfig::Postgrest {
            url,
            table: "staged_contents".to_string(),
            service_key: None,
            service_key_file: None,
            service_key_env_var: Some("SUPABASE_SERVICE_ROLE_KEY".to_string()),
            timeout_secs: 30,
        },
        None => match first_env(&[SQLITE_PATH_ENV]) {
            Some(path) => StoreConfig::Sqlite { path: Some(path) },
            None => return Err(ConfigError::MissingEnv(SUPABASE_URL_ENVS[0].to_string())),
        },
    };

    let mut claim = ClaimConfig::default();
    if let Some(value) = first_env(&[CLAIMS_ENV]) {
        claim.enabled = parse_flag(CLAIMS_ENV, &value)?;
    }

    let config = WorkerConfig {
        store,
        ocr: OcrConfig::default(),
        fetch: Default::default(),
        poll: Default::default(),
        claim,
    };
    validate_config(&config)?;
    Ok(config)
}

/// Uses `FESTIVAL_OCR_CONFIG` when set, the plain environment otherwise.
pub fn load_default_config() -> Result<WorkerConfig, ConfigError> {
    match first_env(&[CONFIG_PATH_ENV]) {
        Some(path) => {
            log::info!("Loading config from {}", path);
            load_config(path)
        }
        None => {
            log::info!("{} not set, configuring from environment", CONFIG_PATH_ENV);
            config_from_env()
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(ConfigError::Validation {
            message: format!("{} must be a boolean, got '{}'", name, other),
        }),
    }
}

fn validate_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if let StoreConfig::Postgrest { url, table, .. } = &config.store {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation {
                message: format!("store.url must be an http(s) URL, got '{}'", url),
            });
        }
        if table.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "store.table must not be empty".to_string(),
            });
        }
    }

    if let OcrConfig::GoogleVision { timeout_secs, .. } = &config.ocr {
        if *timeout_secs == 0 {
            return Err(ConfigError::Validation {
                message: "ocr.timeout_secs must be greater than 0".to_string(),
            });
        }
    }

    if config.fetch.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "fetch.timeout_secs must be greater than 0".to_string(),
        });
    }

    if config.fetch.max_image_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "fetch.max_image_bytes must be greater than 0".to_string(),
        });
    }

    if config.poll.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "poll.batch_size must be at least 1".to_string(),
        });
    }

    if config.poll.eligible_categories.is_empty() {
        return Err(ConfigError::Validation {
            message: "poll.eligible_categories must name at least one category".to_string(),
        });
    }

    if config.claim.enabled && config.claim.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "claim.max_attempts must be at least 1".to_string(),
        });
    }

    Ok(())
}
