//! Error taxonomy for the extraction / normalization core.
//!
//! Configuration and dependency errors are raised before any page work is
//! started. Page-level failures (`PageError`) never leave the extraction
//! coordinator; they are logged and the page is recorded as absent.

use crate::types::{DocumentId, DocumentState};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by `ExtractionCoordinator::extract`.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Bad engine name, invalid page range, or otherwise unusable config.
    #[error("invalid extraction configuration: {0}")]
    Configuration(String),

    /// The selected backend's underlying library or models are unavailable.
    #[error("{backend} backend is unavailable: {reason}")]
    DependencyMissing {
        backend: &'static str,
        reason: String,
    },

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// The source file could not be read.
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),

    /// The PDF structure could not be parsed.
    #[error("failed to parse PDF: {0}")]
    Pdf(String),

    #[error("text file is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The whole job ran past its deadline; outstanding pages were cancelled.
    #[error("extraction exceeded its {limit:?} deadline with {completed}/{total} pages finished")]
    DeadlineExceeded {
        limit: Duration,
        completed: usize,
        total: usize,
    },

    #[error("failed to start page worker: {0}")]
    WorkerSpawn(std::io::Error),
}

impl ExtractError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn missing(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::DependencyMissing {
            backend,
            reason: reason.into(),
        }
    }

    /// True for errors raised synchronously before any work started.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::DependencyMissing { .. } | Self::UnsupportedFileType(_)
        )
    }
}

/// Failure of a single page task. Absorbed by the coordinator.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page {page} could not be rasterized: {reason}")]
    Rasterize { page: u32, reason: String },

    #[error("recognition failed: {0}")]
    Recognize(String),

    #[error("page {page} did not finish within {limit:?}")]
    TimedOut { page: u32, limit: Duration },

    #[error("page task panicked: {0}")]
    Panicked(String),
}

/// Errors raised by `DocumentLifecycle`.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A job is already in flight for this document. Retry later.
    #[error("document {id} is already being processed (state: {state})")]
    AlreadyProcessing { id: DocumentId, state: DocumentState },

    #[error("document {id} cannot start {operation} from state {state}")]
    InvalidState {
        id: DocumentId,
        state: DocumentState,
        operation: &'static str,
    },

    #[error("document {0} is not registered")]
    UnknownDocument(DocumentId),
}

/// Errors surfaced to the job dispatcher by `DocumentProcessor`.
///
/// Any variant other than `Lifecycle` means the document was rolled back
/// to the state it held before the job started.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("normalization configuration is invalid: {0}")]
    Normalize(String),

    #[error("extraction produced no text")]
    EmptyExtraction,

    #[error("document {0} has no extracted text to normalize")]
    MissingArtifact(DocumentId),

    #[error("artifact storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type ExtractResult<T> = std::result::Result<T, ExtractError>;
