//! Local Tesseract engine, for running without a Vision API key.

use std::io::Cursor;

use super::OcrBackend;
use crate::error::OcrError;

pub const ENGINE_ID: &str = "tesseract";

pub struct TesseractBackend {
    languages: String,
}

impl TesseractBackend {
    pub fn new(languages: &[String]) -> Self {
        let languages = if languages.is_empty() {
            "kor+eng".to_string()
        } else {
            languages.join("+")
        };
        Self { languages }
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }
}

impl OcrBackend for TesseractBackend {
    fn engine(&self) -> &str {
        ENGINE_ID
    }

    fn detect_document_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let img = image::load_from_memory(image)
            .map_err(|e| OcrError::Engine(format!("Failed to load image: {}", e)))?;

        // leptess only reads encoded images, so normalize everything to PNG.
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| OcrError::Engine(format!("Failed to convert image: {}", e)))?;

        // A fresh instance per image; LepTess is not Sync.
        let mut lt = leptess::LepTess::new(None, &self.languages)
            .map_err(|e| OcrError::Engine(format!("Failed to initialize Tesseract: {}", e)))?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| OcrError::Engine(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| OcrError::Engine(format!("OCR failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_languages_joined() {
        let backend = TesseractBackend::new(&["kor".to_string(), "eng".to_string()]);
        assert_eq!(backend.languages(), "kor+eng");
        assert_eq!(backend.engine(), "tesseract");
    }

    #[test]
    fn test_default_languages() {
        assert_eq!(TesseractBackend::new(&[]).languages(), "kor+eng");
    }

    #[test]
    fn test_invalid_image_data_error() {
        let backend = TesseractBackend::new(&[]);
        match backend.detect_document_text(b"not valid image data") {
            Err(OcrError::Engine(msg)) => assert!(msg.contains("Failed to load image")),
            _ => panic!("Expected Engine error for invalid image data"),
        }
    }
}
