use crate::error::{ExtractError, ExtractResult};
use crate::types::EngineKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_first_page() -> u32 {
    1
}

fn default_workers() -> usize {
    4
}

fn default_dpi() -> u32 {
    300
}

fn default_char_repeat_threshold() -> usize {
    2
}

fn default_sentence_similarity_threshold() -> f64 {
    0.9
}

fn default_min_paragraph_length() -> usize {
    15
}

fn default_min_sentence_length() -> usize {
    5
}

fn default_tesseract_language() -> String {
    "chi_sim".to_string()
}

fn default_page_timeout() -> Option<u64> {
    Some(120)
}

fn default_job_timeout() -> Option<u64> {
    Some(1800)
}

/// Top-level pipeline configuration, loadable from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub limits: ExtractionLimits,
    #[serde(default)]
    pub jobs: JobPolicy,
}

impl PipelineConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: PipelineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Load config with fallback to default
    pub fn load_with_fallback(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                warn!(path = %p.display(), error = %format!("{e:#}"), "failed to load config, using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }
}

/// What to extract and how. Passed per extraction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub engine: EngineKind,
    /// 1-based, inclusive
    #[serde(default = "default_first_page")]
    pub first_page: u32,
    /// Inclusive; `None` means through the last page. Clamped to the page count.
    #[serde(default)]
    pub last_page: Option<u32>,
    /// Skip native text and OCR every page in range
    #[serde(default)]
    pub force_ocr: bool,
    /// Maximum concurrently processed pages
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            first_page: default_first_page(),
            last_page: None,
            force_ocr: false,
            workers: default_workers(),
            fallback: FallbackPolicy::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_pages(mut self, first_page: u32, last_page: Option<u32>) -> Self {
        self.first_page = first_page;
        self.last_page = last_page;
        self
    }

    /// Reject configurations that can never succeed, before any page work.
    pub fn validate(&self) -> ExtractResult<()> {
        if self.first_page < 1 {
            return Err(ExtractError::config("first_page must be at least 1"));
        }
        if let Some(last) = self.last_page {
            if last < self.first_page {
                return Err(ExtractError::config(format!(
                    "last_page {last} is before first_page {}",
                    self.first_page
                )));
            }
        }
        if self.workers == 0 {
            return Err(ExtractError::config("workers must be at least 1"));
        }
        if self.force_ocr && self.engine == EngineKind::Native {
            return Err(ExtractError::config(
                "force_ocr requires an OCR engine, not native",
            ));
        }
        Ok(())
    }
}

/// When native text is unusable, which pages get OCR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// OCR every page in range when the aggregate native text is empty
    #[default]
    WholeDocument,
    /// OCR only the pages whose native text is empty
    PerPage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Runs of one character longer than this collapse to a single character
    #[serde(default = "default_char_repeat_threshold")]
    pub char_repeat_threshold: usize,
    /// Similarity ratio at or above which a later sentence is a duplicate
    #[serde(default = "default_sentence_similarity_threshold")]
    pub sentence_similarity_threshold: f64,
    /// Paragraphs shorter than this (in characters) are dropped
    #[serde(default = "default_min_paragraph_length")]
    pub min_paragraph_length: usize,
    /// Sentences shorter than this (in characters, terminal included) are
    /// dropped during deduplication. 0 keeps every non-empty sentence.
    #[serde(default = "default_min_sentence_length")]
    pub min_sentence_length: usize,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            char_repeat_threshold: default_char_repeat_threshold(),
            sentence_similarity_threshold: default_sentence_similarity_threshold(),
            min_paragraph_length: default_min_paragraph_length(),
            min_sentence_length: default_min_sentence_length(),
        }
    }
}

impl NormalizeConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let t = self.sentence_similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(format!(
                "sentence_similarity_threshold must be in (0, 1], got {t}"
            ));
        }
        Ok(())
    }
}

/// Backend settings for rasterization and the OCR engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Rasterization resolution
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Directory containing the pdfium shared library; system search path when unset
    #[serde(default)]
    pub pdfium_library_path: Option<PathBuf>,
    #[serde(default)]
    pub tesseract: TesseractSettings,
    /// Model bundle for the balanced engine
    #[serde(default)]
    pub balanced: Option<PaddleModels>,
    /// Model bundle for the accurate engine
    #[serde(default)]
    pub accurate: Option<PaddleModels>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            pdfium_library_path: None,
            tesseract: TesseractSettings::default(),
            balanced: None,
            accurate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesseractSettings {
    #[serde(default = "default_tesseract_language")]
    pub language: String,
    /// tessdata directory; the library default when unset
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            language: default_tesseract_language(),
            data_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaddleModels {
    pub det_model_path: PathBuf,
    pub rec_model_path: PathBuf,
    pub char_dict_path: PathBuf,
    /// Optional text line orientation classifier
    #[serde(default)]
    pub cls_model_path: Option<PathBuf>,
}

impl PaddleModels {
    /// Paths that must exist for the bundle to load.
    pub fn required_files(&self) -> Vec<&Path> {
        let mut files = vec![
            self.det_model_path.as_path(),
            self.rec_model_path.as_path(),
            self.char_dict_path.as_path(),
        ];
        if let Some(cls) = &self.cls_model_path {
            files.push(cls.as_path());
        }
        files
    }
}

/// Time limits for page tasks and whole extraction jobs. `None` disables a limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionLimits {
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: Option<u64>,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: Option<u64>,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            page_timeout_secs: default_page_timeout(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

impl ExtractionLimits {
    pub fn unlimited() -> Self {
        Self {
            page_timeout_secs: None,
            job_timeout_secs: None,
        }
    }

    pub fn page_timeout(&self) -> Option<Duration> {
        self.page_timeout_secs.map(Duration::from_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Treat an extraction that yields no text as a failed job
    #[serde(default = "default_true")]
    pub fail_on_empty_extraction: bool,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            fail_on_empty_extraction: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.extraction.engine, EngineKind::BalancedOcr);
        assert_eq!(config.extraction.first_page, 1);
        assert_eq!(config.extraction.last_page, None);
        assert_eq!(config.extraction.workers, 4);
        assert_eq!(config.normalize.char_repeat_threshold, 2);
        assert_eq!(config.normalize.sentence_similarity_threshold, 0.9);
        assert_eq!(config.normalize.min_paragraph_length, 15);
        assert_eq!(config.normalize.min_sentence_length, 5);
        assert_eq!(config.ocr.dpi, 300);
        assert_eq!(config.ocr.tesseract.language, "chi_sim");
        assert!(config.jobs.fail_on_empty_extraction);
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: PipelineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.extraction.workers, 4);
        assert_eq!(config.limits.page_timeout_secs, Some(120));
        assert_eq!(config.normalize.min_sentence_length, 5);
    }

    #[test]
    fn engine_aliases_deserialize() {
        let config: ExtractionConfig = serde_yaml::from_str("engine: tesseract").unwrap();
        assert_eq!(config.engine, EngineKind::FastOcr);
        let config: ExtractionConfig = serde_yaml::from_str("engine: paddleocr").unwrap();
        assert_eq!(config.engine, EngineKind::AccurateOcr);
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let zero = ExtractionConfig::default().with_pages(0, None);
        assert!(matches!(zero.validate(), Err(ExtractError::Configuration(_))));

        let inverted = ExtractionConfig::default().with_pages(5, Some(3));
        assert!(inverted.validate().is_err());

        let single = ExtractionConfig::default().with_pages(3, Some(3));
        assert!(single.validate().is_ok());
    }

    #[test]
    fn validate_rejects_forced_native() {
        let mut config = ExtractionConfig::default().with_engine(EngineKind::Native);
        config.force_ocr = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn similarity_threshold_bounds() {
        let mut config = NormalizeConfig::default();
        assert!(config.validate().is_ok());
        config.sentence_similarity_threshold = 0.0;
        assert!(config.validate().is_err());
        config.sentence_similarity_threshold = 1.0;
        assert!(config.validate().is_ok());
        config.sentence_similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bundled_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/pipeline.yaml");
        let config = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.extraction.fallback, FallbackPolicy::WholeDocument);
        assert!(config.normalize.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back() {
        let config = PipelineConfig::load_with_fallback(Some(Path::new("/nonexistent/kgprep.yaml")));
        assert_eq!(config.extraction.workers, 4);
    }
}
