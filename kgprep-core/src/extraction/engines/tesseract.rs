//! FastOCR backend: Tesseract through `leptess`.

use super::OcrEngine;
use crate::config::TesseractSettings;
use crate::error::{ExtractError, ExtractResult, PageError};
use crate::extraction::raster::ColorMode;
use crate::types::EngineKind;
use image::{DynamicImage, ImageFormat};
use leptess::LepTess;
use std::io::Cursor;

/// Tesseract engine. Each call opens its own handle, so calls may overlap.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    language: String,
    data_path: Option<String>,
}

impl TesseractEngine {
    /// Verify Tesseract initializes with the configured language data.
    pub fn new(settings: &TesseractSettings) -> ExtractResult<Self> {
        let engine = Self {
            language: settings.language.clone(),
            data_path: settings
                .data_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        };
        engine.open().map_err(|reason| {
            ExtractError::missing(
                "tesseract",
                format!(
                    "cannot initialize language '{}': {reason}",
                    engine.language
                ),
            )
        })?;
        Ok(engine)
    }

    fn open(&self) -> Result<LepTess, String> {
        LepTess::new(self.data_path.as_deref(), &self.language).map_err(|e| e.to_string())
    }
}

impl OcrEngine for TesseractEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::FastOcr
    }

    fn color_mode(&self) -> ColorMode {
        ColorMode::Grayscale
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, PageError> {
        let mut tess = self.open().map_err(PageError::Recognize)?;

        // leptess decodes encoded image data, not raw pixels
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| PageError::Recognize(format!("failed to encode page image: {e}")))?;
        tess.set_image_from_mem(png.get_ref())
            .map_err(|e| PageError::Recognize(format!("failed to load page image: {e}")))?;

        tess.get_utf8_text()
            .map_err(|e| PageError::Recognize(e.to_string()))
    }
}
