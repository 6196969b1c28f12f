//! Credential resolution for the store service key and the OCR API key.
//!
//! A secret may come from three places, checked in order:
//!
//! 1. **Direct value** in the config file (local testing only)
//! 2. **File reference**, e.g. a mounted `/run/secrets/vision_api_key`
//! 3. **Environment variable**, e.g. `SUPABASE_SERVICE_ROLE_KEY`

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided for {what} (need one of: direct value, file path, or env var name)")]
    NoSourceProvided { what: &'static str },

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret for {what} is empty")]
    Empty { what: &'static str },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a single secret can be found. Mirrors the `*_file` / `*_env_var`
/// pairs in the config file.
#[derive(Debug, Clone, Copy)]
pub struct SecretSource<'a> {
    pub what: &'static str,
    pub direct: Option<&'a str>,
    pub file_path: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

/// Resolves a secret from the first configured source.
///
/// Whitespace around file contents and env values is trimmed; a source that
/// resolves to an empty string is an error rather than a silent fallthrough.
pub fn resolve_secret(source: SecretSource<'_>) -> Result<SecretString> {
    if let Some(value) = source.direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = source.file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        return non_empty(source.what, content.trim());
    }

    if let Some(var_name) = source.env_var.filter(|v| !v.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => non_empty(source.what, value.trim()),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided { what: source.what })
}

fn non_empty(what: &'static str, value: &str) -> Result<SecretString> {
    if value.is_empty() {
        return Err(SecretError::Empty { what });
    }
    Ok(SecretString::from(value.to_string()))
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
