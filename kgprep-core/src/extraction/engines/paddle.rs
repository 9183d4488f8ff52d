//! BalancedOCR and AccurateOCR backends: PaddleOCR ONNX models through `oar-ocr`.

use super::Recognizer;
use crate::config::PaddleModels;
use crate::error::{ExtractError, ExtractResult, PageError};
use image::DynamicImage;
use oar_ocr::oarocr::{OAROCRBuilder, OAROCR};

/// One loaded detection + recognition pipeline. Not reentrant; the engine
/// provider wraps it in a `SerializedEngine`.
pub struct PaddleRecognizer {
    ocr: OAROCR,
}

impl PaddleRecognizer {
    pub fn load(models: &PaddleModels) -> ExtractResult<Self> {
        let det = models.det_model_path.to_string_lossy().into_owned();
        let rec = models.rec_model_path.to_string_lossy().into_owned();
        let dict = models.char_dict_path.to_string_lossy().into_owned();

        let mut builder = OAROCRBuilder::new(&det, &rec, &dict);
        if let Some(cls) = &models.cls_model_path {
            let cls = cls.to_string_lossy().into_owned();
            builder = builder.with_text_line_orientation_classification(cls.as_str());
        }

        let ocr = builder
            .image_batch_size(1)
            .region_batch_size(16)
            .build()
            .map_err(|e| ExtractError::missing("paddle", e.to_string()))?;
        Ok(Self { ocr })
    }
}

impl Recognizer for PaddleRecognizer {
    fn recognize(&mut self, image: &DynamicImage) -> Result<String, PageError> {
        let mut results = self
            .ocr
            .predict(vec![image.to_rgb8()])
            .map_err(|e| PageError::Recognize(e.to_string()))?;
        let Some(result) = results.pop() else {
            return Ok(String::new());
        };

        let mut lines = Vec::new();
        for region in result.text_regions {
            if let Some(text) = region.text {
                let text = text.trim();
                if !text.is_empty() {
                    lines.push(text.to_string());
                }
            }
        }
        Ok(lines.join("\n"))
    }
}
