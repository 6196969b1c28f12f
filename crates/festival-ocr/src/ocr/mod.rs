pub mod vision;

#[cfg(feature = "tesseract")]
pub mod tesseract;

pub use vision::GoogleVisionBackend;

#[cfg(feature = "tesseract")]
pub use tesseract::TesseractBackend;

use crate::error::OcrError;

/// A document text detection engine.
///
/// Implementations return the full text blob for one image. An image with no
/// text region is `Ok("")`, not an error.
pub trait OcrBackend: Send + Sync {
    /// Identifier stored in each result entry's `engine` field.
    fn engine(&self) -> &str;

    fn detect_document_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Splits a text blob into trimmed, non-empty lines in their original order.
pub fn clean_lines(blob: &str) -> Vec<String> {
    blob.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runs OCR and cleans the result, keeping backend failures distinct from
/// an image that simply has no text.
pub fn try_extract_text(backend: &dyn OcrBackend, image: &[u8]) -> Result<Vec<String>, OcrError> {
    let _span = tracing::debug_span!("ocr.extract", engine = backend.engine()).entered();
    let blob = backend.detect_document_text(image)?;
    Ok(clean_lines(&blob))
}

/// Runs OCR and returns the cleaned lines, or an empty list on any failure.
pub fn extract_text(backend: &dyn OcrBackend, image: &[u8]) -> Vec<String> {
    match try_extract_text(backend, image) {
        Ok(lines) => lines,
        Err(e) => {
            log::warn!("{} OCR failed: {}", backend.engine(), e);
            Vec::new()
        }
    }
}
