use crate::config::{ExtractionConfig, JobPolicy, NormalizeConfig, PipelineConfig};
use crate::error::JobError;
use crate::extraction::ExtractionCoordinator;
use crate::lifecycle::DocumentLifecycle;
use crate::normalize::NormalizationPipeline;
use crate::storage::{ArtifactStage, ArtifactStore, FileArtifactStore};
use crate::types::{DocumentId, DocumentState, ExtractionOutcome, NormalizedText, SourceDocument};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Job layer: runs extraction and normalization through the document
/// lifecycle and persists the resulting artifacts. Any failure rolls the
/// document back to the state it held before the job and is returned to
/// the dispatcher.
pub struct DocumentProcessor {
    lifecycle: Arc<DocumentLifecycle>,
    coordinator: ExtractionCoordinator,
    storage: Box<dyn ArtifactStore + Send + Sync>,
    policy: JobPolicy,
}

impl DocumentProcessor {
    /// Create DocumentProcessor with full dependency injection
    pub fn new_with_dependencies(
        lifecycle: Arc<DocumentLifecycle>,
        coordinator: ExtractionCoordinator,
        storage: Box<dyn ArtifactStore + Send + Sync>,
        policy: JobPolicy,
    ) -> Self {
        Self {
            lifecycle,
            coordinator,
            storage,
            policy,
        }
    }

    /// Convenience constructor with the compiled-in backends and file storage
    pub fn with_storage_dir(config: &PipelineConfig, storage_dir: &Path) -> anyhow::Result<Self> {
        let storage = Box::new(FileArtifactStore::new(storage_dir)?);
        Ok(Self::new_with_dependencies(
            Arc::new(DocumentLifecycle::new()),
            ExtractionCoordinator::new(config),
            storage,
            config.jobs.clone(),
        ))
    }

    pub fn lifecycle(&self) -> &Arc<DocumentLifecycle> {
        &self.lifecycle
    }

    pub fn storage(&self) -> &dyn ArtifactStore {
        self.storage.as_ref()
    }

    pub fn coordinator(&self) -> &ExtractionCoordinator {
        &self.coordinator
    }

    /// Extract a document's text and store it as the raw artifact.
    pub fn extract_document(
        &self,
        document: &SourceDocument,
        config: &ExtractionConfig,
    ) -> Result<ExtractionOutcome, JobError> {
        let permit = self.lifecycle.begin_extraction(document.id)?;
        let started = Instant::now();

        match self.run_extraction(document, config) {
            Ok(outcome) => {
                self.lifecycle.complete_extraction(permit, true)?;
                info!(
                    document_id = %document.id,
                    engine = %outcome.engine_used,
                    skipped_pages = outcome.skipped_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "extraction job succeeded"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(document_id = %document.id, error = %e, "extraction job failed");
                self.lifecycle.complete_extraction(permit, false)?;
                Err(e)
            }
        }
    }

    fn run_extraction(
        &self,
        document: &SourceDocument,
        config: &ExtractionConfig,
    ) -> Result<ExtractionOutcome, JobError> {
        let outcome = self.coordinator.extract(document, config)?;
        if self.policy.fail_on_empty_extraction && outcome.text.trim().is_empty() {
            return Err(JobError::EmptyExtraction);
        }

        let id = document.id;
        let previous_raw = self.snapshot(id, ArtifactStage::Raw)?;
        let previous_normalized = self.snapshot(id, ArtifactStage::Normalized)?;

        // Normalized text derived from the previous extraction is stale now
        self.storage.remove(id, ArtifactStage::Normalized)?;
        if let Err(e) = self
            .storage
            .write_text(id, ArtifactStage::Raw, &outcome.text, None)
        {
            self.restore(id, ArtifactStage::Raw, previous_raw);
            self.restore(id, ArtifactStage::Normalized, previous_normalized);
            return Err(e.into());
        }
        Ok(outcome)
    }

    /// Text and word count of a stored artifact, if any.
    fn snapshot(
        &self,
        id: DocumentId,
        stage: ArtifactStage,
    ) -> anyhow::Result<Option<(String, Option<usize>)>> {
        let Some(text) = self.storage.read_text(id, stage)? else {
            return Ok(None);
        };
        let word_count = self.storage.record(id, stage)?.and_then(|r| r.word_count);
        Ok(Some((text, word_count)))
    }

    /// Put an artifact back the way it was before a failed job.
    fn restore(
        &self,
        id: DocumentId,
        stage: ArtifactStage,
        previous: Option<(String, Option<usize>)>,
    ) {
        let restored = match previous {
            Some((text, word_count)) => self
                .storage
                .write_text(id, stage, &text, word_count)
                .map(|_| ()),
            None => self.storage.remove(id, stage),
        };
        if let Err(e) = restored {
            error!(
                document_id = %id,
                %stage,
                error = %e,
                "failed to restore artifact after a failed job"
            );
        }
    }

    /// Normalize the stored raw text of a document and store the result.
    pub fn normalize_document(
        &self,
        id: DocumentId,
        config: &NormalizeConfig,
    ) -> Result<NormalizedText, JobError> {
        config.validate().map_err(JobError::Normalize)?;
        let permit = self.lifecycle.begin_normalization(id)?;
        let started = Instant::now();

        match self.run_normalization(id, config) {
            Ok(normalized) => {
                self.lifecycle.complete_normalization(permit, true)?;
                info!(
                    document_id = %id,
                    word_count = normalized.word_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "normalization job succeeded"
                );
                Ok(normalized)
            }
            Err(e) => {
                error!(document_id = %id, error = %e, "normalization job failed");
                self.lifecycle.complete_normalization(permit, false)?;
                Err(e)
            }
        }
    }

    fn run_normalization(
        &self,
        id: DocumentId,
        config: &NormalizeConfig,
    ) -> Result<NormalizedText, JobError> {
        let raw = self
            .storage
            .read_text(id, ArtifactStage::Raw)?
            .ok_or(JobError::MissingArtifact(id))?;

        let normalized = NormalizationPipeline::new(config.clone()).normalize_counted(&raw);
        let previous = self.snapshot(id, ArtifactStage::Normalized)?;
        if let Err(e) = self.storage.write_text(
            id,
            ArtifactStage::Normalized,
            &normalized.text,
            Some(normalized.word_count),
        ) {
            self.restore(id, ArtifactStage::Normalized, previous);
            return Err(e.into());
        }
        Ok(normalized)
    }

    /// Register a document, then extract and normalize it.
    pub fn process_document(
        &self,
        document: &SourceDocument,
        config: &PipelineConfig,
    ) -> Result<NormalizedText, JobError> {
        if self.lifecycle.state(document.id).is_none() {
            self.lifecycle.register(document.id, DocumentState::Uploaded);
        }
        self.extract_document(document, &config.extraction)?;
        self.normalize_document(document.id, &config.normalize)
    }
}
