use crate::error::{ExtractError, ExtractResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

// ===== DOCUMENT IDENTITY =====
// Documents are created and owned by the external persistence layer. The
// core only references them by id and reads their bytes.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Txt,
}

impl FileType {
    /// Map a file extension (case-insensitive, without the dot) to a file type.
    pub fn from_extension(ext: &str) -> ExtractResult<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" => Ok(Self::Txt),
            other => Err(ExtractError::UnsupportedFileType(other.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> ExtractResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(ext)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => f.write_str("pdf"),
            Self::Txt => f.write_str("txt"),
        }
    }
}

/// An uploaded document as seen by the pipeline. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub file_type: FileType,
    /// Location of the uploaded bytes
    pub location: PathBuf,
    /// Total page count, PDF only. Computed from the file when absent.
    pub total_pages: Option<u32>,
}

impl SourceDocument {
    /// Describe an uploaded file, inferring the file type from its extension.
    pub fn from_path(location: impl Into<PathBuf>) -> ExtractResult<Self> {
        let location = location.into();
        let file_type = FileType::from_path(&location)?;
        Ok(Self {
            id: DocumentId::new(),
            file_type,
            location,
            total_pages: None,
        })
    }

    pub fn with_id(mut self, id: DocumentId) -> Self {
        self.id = id;
        self
    }
}

// ===== LIFECYCLE STATE =====

/// Processing stage of a document.
///
/// `Extracting` and `Normalizing` are in-flight states; the other three are
/// stable states a failed job rolls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Uploaded,
    Extracting,
    Extracted,
    Normalizing,
    Normalized,
}

impl DocumentState {
    pub fn is_processing(self) -> bool {
        matches!(self, Self::Extracting | Self::Normalizing)
    }

    pub fn is_stable(self) -> bool {
        !self.is_processing()
    }

    /// Position in the forward progression Uploaded → Normalized.
    pub fn progress(self) -> u8 {
        match self {
            Self::Uploaded => 0,
            Self::Extracting => 1,
            Self::Extracted => 2,
            Self::Normalizing => 3,
            Self::Normalized => 4,
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uploaded => "uploaded",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Normalizing => "normalizing",
            Self::Normalized => "normalized",
        };
        f.write_str(name)
    }
}

// ===== EXTRACTION =====

/// Text extraction strategy. Selected once per extraction call.
///
/// - `Native`: embedded PDF text only, never OCR
/// - `FastOcr`: Tesseract, lowest accuracy, fastest
/// - `BalancedOcr`: PaddleOCR mobile models
/// - `AccurateOcr`: PaddleOCR server models, slowest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[serde(alias = "pdf", alias = "pdfplumber")]
    Native,
    #[serde(alias = "fast", alias = "tesseract")]
    FastOcr,
    #[default]
    #[serde(alias = "balanced", alias = "cnocr")]
    BalancedOcr,
    #[serde(alias = "accurate", alias = "paddle", alias = "paddleocr")]
    AccurateOcr,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        Self::Native,
        Self::FastOcr,
        Self::BalancedOcr,
        Self::AccurateOcr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::FastOcr => "fast_ocr",
            Self::BalancedOcr => "balanced_ocr",
            Self::AccurateOcr => "accurate_ocr",
        }
    }

    pub fn is_ocr(self) -> bool {
        !matches!(self, Self::Native)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "pdf" | "pdfplumber" => Ok(Self::Native),
            "fast_ocr" | "fast" | "tesseract" => Ok(Self::FastOcr),
            "balanced_ocr" | "balanced" | "cnocr" => Ok(Self::BalancedOcr),
            "accurate_ocr" | "accurate" | "paddle" | "paddleocr" => Ok(Self::AccurateOcr),
            other => Err(ExtractError::config(format!("unknown engine '{other}'"))),
        }
    }
}

/// Text of one page, or `None` when rasterization/recognition failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_number: u32,
    pub text: Option<String>,
}

impl PageResult {
    pub fn present(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: Some(text.into()),
        }
    }

    pub fn absent(page_number: u32) -> Self {
        Self {
            page_number,
            text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// Present, non-empty pages joined by newline in page order
    pub text: String,
    /// Engine that actually produced the text
    pub engine_used: EngineKind,
    /// Per-page results sorted by page number (empty for TXT input)
    pub pages: Vec<PageResult>,
    /// Pages recorded absent because their task failed
    pub skipped_pages: Vec<u32>,
}

impl ExtractionOutcome {
    /// Assemble an outcome from page results in any completion order.
    pub fn from_pages(mut pages: Vec<PageResult>, engine_used: EngineKind) -> Self {
        pages.sort_by_key(|p| p.page_number);

        let text = pages
            .iter()
            .filter_map(|p| p.text.as_deref())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let skipped_pages = pages
            .iter()
            .filter(|p| p.text.is_none())
            .map(|p| p.page_number)
            .collect();

        Self {
            text,
            engine_used,
            pages,
            skipped_pages,
        }
    }

    /// Outcome for plain-text input, which has no pages.
    pub fn verbatim(text: String) -> Self {
        Self {
            text,
            engine_used: EngineKind::Native,
            pages: Vec::new(),
            skipped_pages: Vec::new(),
        }
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped_pages.len()
    }
}

// ===== NORMALIZATION =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    pub text: String,
    pub word_count: usize,
}

impl NormalizedText {
    pub fn new(text: String) -> Self {
        let word_count = word_count(&text);
        Self { text, word_count }
    }
}

/// Length of the text in characters. Chinese text has no word separators,
/// so each character, punctuation and line breaks included, counts as one.
pub fn word_count(text: &str) -> usize {
    text.chars().count()
}
