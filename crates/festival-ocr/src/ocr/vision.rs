//! Google Cloud Vision `images:annotate` client using document text detection.

use std::time::Duration;

use base64::Engine;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::OcrBackend;
use crate::error::OcrError;

pub const ENGINE_ID: &str = "google_vision";

pub const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Error bodies are cut to this length before they reach the logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    requests: [ImageRequest<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest<'a> {
    image: ImageContent,
    features: [Feature; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    image_context: Option<ImageContext<'a>>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext<'a> {
    language_hints: &'a [String],
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    full_text_annotation: Option<TextAnnotation>,
    #[serde(default)]
    error: Option<Status>,
}

#[derive(Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Vision API backend authenticated with an API key.
pub struct GoogleVisionBackend {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    language_hints: Vec<String>,
}

impl GoogleVisionBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        language_hints: Vec<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, OcrError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            language_hints,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl OcrBackend for GoogleVisionBackend {
    fn engine(&self) -> &str {
        ENGINE_ID
    }

    fn detect_document_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let body = build_request(image, &self.language_hints);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()?;

        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(OcrError::Status {
                status: status.as_u16(),
                body: truncate(&text),
            });
        }

        parse_response(&text)
    }
}

fn build_request<'a>(image: &[u8], language_hints: &'a [String]) -> AnnotateRequest<'a> {
    AnnotateRequest {
        requests: [ImageRequest {
            image: ImageContent {
                content: base64::engine::general_purpose::STANDARD.encode(image),
            },
            features: [Feature {
                kind: "DOCUMENT_TEXT_DETECTION",
            }],
            image_context: (!language_hints.is_empty())
                .then_some(ImageContext { language_hints }),
        }],
    }
}

/// Extracts the full text blob from an `images:annotate` response body.
/// A response without `fullTextAnnotation` means the image had no text.
fn parse_response(body: &str) -> Result<String, OcrError> {
    let parsed: AnnotateResponse =
        serde_json::from_str(body).map_err(|e| OcrError::MalformedResponse(e.to_string()))?;

    let first = parsed
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| OcrError::MalformedResponse("empty 'responses' array".to_string()))?;

    if let Some(err) = first.error {
        return Err(OcrError::Rejected(format!("{} (code {})", err.message, err.code)));
    }

    Ok(first
        .full_text_annotation
        .map(|annotation| annotation.text)
        .unwrap_or_default())
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}
