//! Staged content rows and the OCR output written back into them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::RecordError;

/// Opaque row identifier.
///
/// The hosted table uses integer ids while SQLite stores text, so both JSON
/// forms are accepted and normalized to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => RecordId(s),
            Raw::Int(n) => RecordId(n.to_string()),
        })
    }
}

/// Staged content categories produced by the ingestion side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    FestivalBase,
    OfficialLineup,
    OfficialTimetable,
    OfficialNotice,
    ExternalContent,
    ArchiveData,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FestivalBase => "FESTIVAL_BASE",
            Category::OfficialLineup => "OFFICIAL_LINEUP",
            Category::OfficialTimetable => "OFFICIAL_TIMETABLE",
            Category::OfficialNotice => "OFFICIAL_NOTICE",
            Category::ExternalContent => "EXTERNAL_CONTENT",
            Category::ArchiveData => "ARCHIVE_DATA",
        }
    }

    /// Categories whose images carry text worth running OCR on.
    pub fn ocr_defaults() -> Vec<Category> {
        vec![Category::OfficialTimetable, Category::OfficialLineup]
    }
}

/// Processing marker on a staged row. `None` on the row means eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OcrStatus {
    /// Claimed by a worker; carries a lease via `ocr_claimed_at`.
    Processing,
    Done,
    /// Gave up after the attempt limit.
    Failed,
}

impl OcrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrStatus::Processing => "PROCESSING",
            OcrStatus::Done => "DONE",
            OcrStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for OcrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(OcrStatus::Processing),
            "DONE" => Ok(OcrStatus::Done),
            "FAILED" => Ok(OcrStatus::Failed),
            other => Err(format!("unknown ocr_status '{}'", other)),
        }
    }
}

/// A row of `staged_contents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedContent {
    pub id: RecordId,
    pub category: String,
    #[serde(default)]
    pub raw_data: Value,
    #[serde(default)]
    pub ocr_status: Option<OcrStatus>,
    #[serde(default)]
    pub ocr_attempts: u32,
    #[serde(default)]
    pub ocr_claimed_at: Option<DateTime<Utc>>,
}

impl StagedContent {
    pub fn festival_name(&self) -> Option<&str> {
        self.raw_data.get("festival_name").and_then(Value::as_str)
    }
}

/// One entry of the resolved image list. `url` is `None` for descriptors
/// that cannot be fetched; they keep their position but are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub url: Option<String>,
}

impl ImageDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
        }
    }
}

/// Resolves the images to OCR for a record.
///
/// `items` wins when it is a non-empty array; otherwise a non-empty
/// `image_url` becomes a single-element list; otherwise the list is empty.
pub fn resolve_images(raw_data: &Value) -> Result<Vec<ImageDescriptor>, RecordError> {
    let doc = raw_data.as_object().ok_or_else(|| {
        RecordError::MalformedRawData(format!("expected an object, got {}", json_kind(raw_data)))
    })?;

    let items = match doc.get("items") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        Some(other) => {
            return Err(RecordError::MalformedRawData(format!(
                "'items' must be an array, got {}",
                json_kind(other)
            )))
        }
    };

    if !items.is_empty() {
        return Ok(items
            .iter()
            .map(|item| ImageDescriptor {
                url: item
                    .get("url")
                    .and_then(Value::as_str)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string),
            })
            .collect());
    }

    match doc.get("image_url").and_then(Value::as_str) {
        Some(url) if !url.is_empty() => Ok(vec![ImageDescriptor::new(url)]),
        _ => Ok(Vec::new()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Text extracted from one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResultEntry {
    pub image_index: usize,
    pub url: String,
    pub texts: Vec<String>,
    pub engine: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    FetchFailed,
    OcrFailed,
    NoText,
}

/// An image that contributed nothing to `ocr_result`, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFailure {
    pub image_index: usize,
    pub url: String,
    pub reason: FailureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Returns `raw_data` with `ocr_result` and `ocr_failures` replaced.
/// Every other key is carried over untouched.
pub fn apply_ocr_output(
    raw_data: &Value,
    entries: &[OcrResultEntry],
    failures: &[ImageFailure],
) -> Result<Value, RecordError> {
    let mut doc: Map<String, Value> = raw_data
        .as_object()
        .cloned()
        .ok_or_else(|| RecordError::MalformedRawData("expected an object".to_string()))?;

    let entries = serde_json::to_value(entries)
        .map_err(|e| RecordError::MalformedRawData(format!("ocr_result: {}", e)))?;
    let failures = serde_json::to_value(failures)
        .map_err(|e| RecordError::MalformedRawData(format!("ocr_failures: {}", e)))?;

    doc.insert("ocr_result".to_string(), entries);
    doc.insert("ocr_failures".to_string(), failures);
    Ok(Value::Object(doc))
}
