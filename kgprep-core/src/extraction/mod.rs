//! Text extraction: native PDF text with OCR fallback.
//!
//! The coordinator resolves everything that can fail up front (config,
//! engine, rasterizer, page range), then runs the native pass sequentially
//! and hands pages that need OCR to the bounded worker pool.

pub mod engines;
pub mod native;
pub mod page_range;
pub(crate) mod pool;
pub mod raster;

use crate::config::{ExtractionConfig, ExtractionLimits, FallbackPolicy, PipelineConfig};
use crate::error::ExtractResult;
use crate::types::{EngineKind, ExtractionOutcome, FileType, PageResult, SourceDocument};
use engines::{DefaultEngineProvider, EngineProvider, OcrEngine};
use native::{LopdfExtractor, NativePdf, NativeTextExtractor};
use page_range::resolve_page_range;
use pool::{run_pages, OcrJob};
use raster::{default_rasterizer, PageRasterizer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct ExtractionCoordinator {
    native: Box<dyn NativeTextExtractor>,
    rasterizer: Arc<dyn PageRasterizer>,
    engines: Box<dyn EngineProvider>,
    limits: ExtractionLimits,
}

impl ExtractionCoordinator {
    /// Coordinator with the backends compiled into this build.
    pub fn new(config: &PipelineConfig) -> Self {
        Self::new_with_dependencies(
            Box::new(LopdfExtractor::new()),
            Arc::from(default_rasterizer(&config.ocr)),
            Box::new(DefaultEngineProvider::new(config.ocr.clone())),
            config.limits.clone(),
        )
    }

    /// Dependency injection constructor
    pub fn new_with_dependencies(
        native: Box<dyn NativeTextExtractor>,
        rasterizer: Arc<dyn PageRasterizer>,
        engines: Box<dyn EngineProvider>,
        limits: ExtractionLimits,
    ) -> Self {
        Self {
            native,
            rasterizer,
            engines,
            limits,
        }
    }

    pub fn limits(&self) -> &ExtractionLimits {
        &self.limits
    }

    /// Extract the text of an uploaded document from its stored location.
    pub fn extract(
        &self,
        document: &SourceDocument,
        config: &ExtractionConfig,
    ) -> ExtractResult<ExtractionOutcome> {
        let engine = self.prepare(document.file_type, config)?;
        let bytes = std::fs::read(&document.location)?;
        debug!(
            document_id = %document.id,
            path = %document.location.display(),
            bytes = bytes.len(),
            "read source document"
        );

        self.run(document.file_type, bytes, engine, config, document.total_pages)
    }

    /// Extract from in-memory bytes.
    pub fn extract_bytes(
        &self,
        file_type: FileType,
        bytes: Vec<u8>,
        config: &ExtractionConfig,
    ) -> ExtractResult<ExtractionOutcome> {
        let engine = self.prepare(file_type, config)?;
        self.run(file_type, bytes, engine, config, None)
    }

    /// Checks that must pass before any work starts. Returns the OCR engine
    /// for PDF extraction with an OCR engine kind.
    fn prepare(
        &self,
        file_type: FileType,
        config: &ExtractionConfig,
    ) -> ExtractResult<Option<Arc<dyn OcrEngine>>> {
        config.validate()?;
        if file_type == FileType::Txt || !config.engine.is_ocr() {
            return Ok(None);
        }

        let engine = self.engines.engine(config.engine)?;
        self.rasterizer.ensure_available()?;
        Ok(Some(engine))
    }

    fn run(
        &self,
        file_type: FileType,
        bytes: Vec<u8>,
        engine: Option<Arc<dyn OcrEngine>>,
        config: &ExtractionConfig,
        expected_pages: Option<u32>,
    ) -> ExtractResult<ExtractionOutcome> {
        match file_type {
            FileType::Txt => {
                let text = String::from_utf8(bytes)?;
                info!(chars = text.chars().count(), "read plain-text document");
                Ok(ExtractionOutcome::verbatim(text))
            }
            FileType::Pdf => self.extract_pdf(bytes, engine, config, expected_pages),
        }
    }

    fn extract_pdf(
        &self,
        bytes: Vec<u8>,
        engine: Option<Arc<dyn OcrEngine>>,
        config: &ExtractionConfig,
        expected_pages: Option<u32>,
    ) -> ExtractResult<ExtractionOutcome> {
        let started = Instant::now();
        let pdf = self.native.open(&bytes)?;
        let total_pages = pdf.page_count();
        if let Some(expected) = expected_pages.filter(|&n| n != total_pages) {
            warn!(expected, actual = total_pages, "recorded page count differs from the file");
        }

        let range = resolve_page_range(config.first_page, config.last_page, total_pages)?;
        let pages: Vec<u32> = range.collect();
        debug!(
            first = config.first_page,
            last = pages.last().copied().unwrap_or_default(),
            total_pages,
            "resolved page range"
        );

        let outcome = match engine {
            None => self.native_outcome(pdf.as_ref(), &pages),
            Some(engine) if config.force_ocr => {
                drop(pdf);
                let results = self.ocr_pages(bytes, &engine, &pages, config.workers)?;
                ExtractionOutcome::from_pages(results, engine.kind())
            }
            Some(engine) => {
                let native = self.native_outcome(pdf.as_ref(), &pages);
                drop(pdf);
                self.fallback(native, bytes, &engine, config)?
            }
        };

        info!(
            engine = %outcome.engine_used,
            pages = pages.len(),
            skipped = outcome.skipped_count(),
            chars = outcome.text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extraction finished"
        );
        Ok(outcome)
    }

    /// Apply the fallback policy to a completed native pass.
    fn fallback(
        &self,
        native: ExtractionOutcome,
        bytes: Vec<u8>,
        engine: &Arc<dyn OcrEngine>,
        config: &ExtractionConfig,
    ) -> ExtractResult<ExtractionOutcome> {
        match config.fallback {
            FallbackPolicy::WholeDocument => {
                if !native.text.is_empty() {
                    return Ok(native);
                }
                let pages: Vec<u32> = native.pages.iter().map(|p| p.page_number).collect();
                info!(
                    engine = %engine.kind(),
                    pages = pages.len(),
                    "no embedded text, running OCR on every page"
                );
                let results = self.ocr_pages(bytes, engine, &pages, config.workers)?;
                Ok(ExtractionOutcome::from_pages(results, engine.kind()))
            }
            FallbackPolicy::PerPage => {
                let blank: Vec<u32> = native
                    .pages
                    .iter()
                    .filter(|p| p.text.as_deref().map_or(true, str::is_empty))
                    .map(|p| p.page_number)
                    .collect();
                if blank.is_empty() {
                    return Ok(native);
                }
                info!(
                    engine = %engine.kind(),
                    pages = ?blank,
                    "running OCR on pages without embedded text"
                );

                let ocr = self.ocr_pages(bytes, engine, &blank, config.workers)?;
                let mut merged: Vec<PageResult> = native
                    .pages
                    .into_iter()
                    .filter(|p| !blank.contains(&p.page_number))
                    .collect();
                merged.extend(ocr);
                Ok(ExtractionOutcome::from_pages(merged, engine.kind()))
            }
        }
    }

    /// Sequential pass over the embedded text layer.
    fn native_outcome(&self, pdf: &dyn NativePdf, pages: &[u32]) -> ExtractionOutcome {
        let results = pages
            .iter()
            .map(|&page| match pdf.page_text(page) {
                Ok(text) => PageResult::present(page, text.trim()),
                Err(e) => {
                    warn!(page, error = %e, "native text extraction failed, treating page as empty");
                    PageResult::present(page, "")
                }
            })
            .collect();
        ExtractionOutcome::from_pages(results, EngineKind::Native)
    }

    fn ocr_pages(
        &self,
        bytes: Vec<u8>,
        engine: &Arc<dyn OcrEngine>,
        pages: &[u32],
        workers: usize,
    ) -> ExtractResult<Vec<PageResult>> {
        let job = OcrJob {
            pdf: Arc::from(bytes),
            rasterizer: Arc::clone(&self.rasterizer),
            engine: Arc::clone(engine),
        };
        run_pages(job, pages, workers, &self.limits)
    }
}

impl std::fmt::Debug for ExtractionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionCoordinator")
            .field("native", &self.native.name())
            .field("rasterizer", &self.rasterizer.name())
            .field("limits", &self.limits)
            .finish()
    }
}
