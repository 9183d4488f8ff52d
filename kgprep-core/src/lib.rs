// kgprep Core Library
//
// Extracts text from uploaded documents (embedded PDF text with pluggable
// OCR fallback) and normalizes it into clean, deduplicated text for
// keyword extraction and graph building.

pub mod config;
pub mod error;
pub mod extraction;
pub mod lifecycle;
pub mod normalize;
pub mod processor;
pub mod storage;
pub mod types;

// Re-export main types and functions for easy use
pub use types::*;
pub use config::{
    ExtractionConfig, ExtractionLimits, FallbackPolicy, JobPolicy, NormalizeConfig, OcrSettings,
    PipelineConfig,
};
pub use error::{ExtractError, JobError, LifecycleError, PageError};
pub use extraction::engines::{DefaultEngineProvider, EngineProvider, OcrEngine};
pub use extraction::native::{LopdfExtractor, NativePdf, NativeTextExtractor};
pub use extraction::raster::{ColorMode, PageRasterizer};
pub use extraction::ExtractionCoordinator;
pub use lifecycle::{DocumentLifecycle, Permit};
pub use normalize::{normalize, NormalizationPipeline};
pub use processor::DocumentProcessor;
pub use storage::{ArtifactStage, ArtifactStore, FileArtifactStore, MemoryArtifactStore};

// Re-export backends for direct use
#[cfg(feature = "pdfium")]
pub use extraction::raster::PdfiumRasterizer;
#[cfg(feature = "tesseract")]
pub use extraction::engines::TesseractEngine;
