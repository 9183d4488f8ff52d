//! Embedded text extraction for PDFs that carry a text layer.

use crate::error::{ExtractError, ExtractResult};
use lopdf::Document;
use std::collections::BTreeMap;

/// Parses PDF bytes into a handle that yields per-page embedded text.
pub trait NativeTextExtractor: Send + Sync {
    fn open(&self, pdf_bytes: &[u8]) -> ExtractResult<Box<dyn NativePdf>>;

    /// Backend identifier for logging
    fn name(&self) -> &str;
}

/// An opened PDF. Page numbers are 1-based.
pub trait NativePdf {
    fn page_count(&self) -> u32;

    /// Embedded text of one page. An error means the page's content
    /// stream could not be decoded; callers treat it as empty text.
    fn page_text(&self, page: u32) -> Result<String, String>;
}

/// Native extractor backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl NativeTextExtractor for LopdfExtractor {
    fn open(&self, pdf_bytes: &[u8]) -> ExtractResult<Box<dyn NativePdf>> {
        let document = Document::load_mem(pdf_bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        // Physical page order; lopdf keys pages by their 1-based number
        let pages = document.get_pages();
        Ok(Box::new(LopdfPdf { document, pages }))
    }

    fn name(&self) -> &str {
        "lopdf"
    }
}

struct LopdfPdf {
    document: Document,
    pages: BTreeMap<u32, lopdf::ObjectId>,
}

impl NativePdf for LopdfPdf {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, String> {
        if !self.pages.contains_key(&page) {
            return Err(format!("page {page} does not exist"));
        }
        self.document
            .extract_text(&[page])
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_a_pdf_error() {
        let result = LopdfExtractor::new().open(b"definitely not a pdf");
        assert!(matches!(result, Err(ExtractError::Pdf(_))));
    }
}
