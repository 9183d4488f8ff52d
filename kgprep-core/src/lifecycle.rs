//! Per-document processing state machine.
//!
//! Acts as a soft lock: at most one extraction or normalization job may be
//! in flight per document. Beginning a job hands out a [`Permit`]; settling
//! it moves the document forward on success and back to the state it held
//! before the job on failure. A permit dropped without being settled (early
//! return, panic) rolls back too.

use crate::error::LifecycleError;
use crate::types::{DocumentId, DocumentState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Extraction,
    Normalization,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Extraction => "extraction",
            Operation::Normalization => "normalization",
        }
    }

    fn in_flight(self) -> DocumentState {
        match self {
            Operation::Extraction => DocumentState::Extracting,
            Operation::Normalization => DocumentState::Normalizing,
        }
    }

    fn done(self) -> DocumentState {
        match self {
            Operation::Extraction => DocumentState::Extracted,
            Operation::Normalization => DocumentState::Normalized,
        }
    }

    /// Stable states the operation may start from.
    fn may_start_from(self, state: DocumentState) -> bool {
        match self {
            Operation::Extraction => matches!(
                state,
                DocumentState::Uploaded | DocumentState::Extracted | DocumentState::Normalized
            ),
            Operation::Normalization => {
                matches!(state, DocumentState::Extracted | DocumentState::Normalized)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateRecord {
    pub state: DocumentState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DocumentLifecycle {
    records: Mutex<HashMap<DocumentId, StateRecord>>,
}

impl DocumentLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<DocumentId, StateRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed or overwrite a document's state, e.g. from the persistence layer.
    pub fn register(&self, id: DocumentId, state: DocumentState) {
        self.records().insert(
            id,
            StateRecord {
                state,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn state(&self, id: DocumentId) -> Option<DocumentState> {
        self.records().get(&id).map(|r| r.state)
    }

    pub fn record(&self, id: DocumentId) -> Option<StateRecord> {
        self.records().get(&id).cloned()
    }

    pub fn forget(&self, id: DocumentId) -> Option<StateRecord> {
        self.records().remove(&id)
    }

    /// `Uploaded | Extracted | Normalized → Extracting`
    pub fn begin_extraction(&self, id: DocumentId) -> Result<Permit<'_>, LifecycleError> {
        self.begin(id, Operation::Extraction)
    }

    /// `Extracted | Normalized → Normalizing`
    pub fn begin_normalization(&self, id: DocumentId) -> Result<Permit<'_>, LifecycleError> {
        self.begin(id, Operation::Normalization)
    }

    pub fn complete_extraction(
        &self,
        permit: Permit<'_>,
        success: bool,
    ) -> Result<DocumentState, LifecycleError> {
        self.complete(permit, Operation::Extraction, success)
    }

    pub fn complete_normalization(
        &self,
        permit: Permit<'_>,
        success: bool,
    ) -> Result<DocumentState, LifecycleError> {
        self.complete(permit, Operation::Normalization, success)
    }

    fn begin(&self, id: DocumentId, operation: Operation) -> Result<Permit<'_>, LifecycleError> {
        let mut records = self.records();
        let record = records
            .get_mut(&id)
            .ok_or(LifecycleError::UnknownDocument(id))?;

        let prior = record.state;
        if prior.is_processing() {
            return Err(LifecycleError::AlreadyProcessing { id, state: prior });
        }
        if !operation.may_start_from(prior) {
            return Err(LifecycleError::InvalidState {
                id,
                state: prior,
                operation: operation.name(),
            });
        }

        let next = operation.in_flight();
        record.state = next;
        record.updated_at = Utc::now();
        info!(document_id = %id, from = %prior, to = %next, "{} started", operation.name());

        Ok(Permit {
            lifecycle: self,
            id,
            operation,
            prior,
            settled: false,
        })
    }

    fn complete(
        &self,
        permit: Permit<'_>,
        operation: Operation,
        success: bool,
    ) -> Result<DocumentState, LifecycleError> {
        if permit.operation != operation {
            return Err(LifecycleError::InvalidState {
                id: permit.id,
                state: permit.operation.in_flight(),
                operation: operation.name(),
            });
        }
        Ok(permit.settle(success))
    }

    fn transition(&self, id: DocumentId, to: DocumentState) {
        let mut records = self.records();
        match records.get_mut(&id) {
            Some(record) => {
                record.state = to;
                record.updated_at = Utc::now();
            }
            None => warn!(document_id = %id, "document was forgotten while a job was in flight"),
        }
    }
}

/// Proof that a job is in flight for one document.
#[must_use = "dropping a permit without settling it rolls the document back"]
#[derive(Debug)]
pub struct Permit<'a> {
    lifecycle: &'a DocumentLifecycle,
    id: DocumentId,
    operation: Operation,
    prior: DocumentState,
    settled: bool,
}

impl Permit<'_> {
    pub fn document_id(&self) -> DocumentId {
        self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// State the document returns to if the job fails.
    pub fn prior_state(&self) -> DocumentState {
        self.prior
    }

    /// Settle the job: advance on success, roll back on failure.
    pub fn settle(mut self, success: bool) -> DocumentState {
        self.settled = true;
        let (from, to) = (self.operation.in_flight(), self.target(success));
        self.lifecycle.transition(self.id, to);
        if success {
            info!(document_id = %self.id, %from, %to, "{} completed", self.operation.name());
        } else {
            warn!(document_id = %self.id, %from, %to, "{} failed, rolled back", self.operation.name());
        }
        to
    }

    fn target(&self, success: bool) -> DocumentState {
        if success {
            self.operation.done()
        } else {
            self.prior
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.lifecycle.transition(self.id, self.prior);
        warn!(
            document_id = %self.id,
            to = %self.prior,
            "{} abandoned, rolled back",
            self.operation.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle_with(state: DocumentState) -> (DocumentLifecycle, DocumentId) {
        let lifecycle = DocumentLifecycle::new();
        let id = DocumentId::new();
        lifecycle.register(id, state);
        (lifecycle, id)
    }

    #[test]
    fn extraction_moves_forward_on_success() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Uploaded);
        let permit = lifecycle.begin_extraction(id).unwrap();
        assert_eq!(lifecycle.state(id), Some(DocumentState::Extracting));
        assert_eq!(permit.prior_state(), DocumentState::Uploaded);

        let state = lifecycle.complete_extraction(permit, true).unwrap();
        assert_eq!(state, DocumentState::Extracted);
        assert_eq!(lifecycle.state(id), Some(DocumentState::Extracted));
    }

    #[test]
    fn extraction_failure_rolls_back() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Uploaded);
        let permit = lifecycle.begin_extraction(id).unwrap();
        lifecycle.complete_extraction(permit, false).unwrap();
        assert_eq!(lifecycle.state(id), Some(DocumentState::Uploaded));
    }

    #[test]
    fn second_trigger_is_rejected_without_state_change() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Uploaded);
        let _permit = lifecycle.begin_extraction(id).unwrap();

        let err = lifecycle.begin_extraction(id).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::AlreadyProcessing {
                state: DocumentState::Extracting,
                ..
            }
        ));
        let err = lifecycle.begin_normalization(id).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyProcessing { .. }));
        assert_eq!(lifecycle.state(id), Some(DocumentState::Extracting));
    }

    #[test]
    fn normalization_requires_extracted_text() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Uploaded);
        let err = lifecycle.begin_normalization(id).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState { .. }));
        assert_eq!(lifecycle.state(id), Some(DocumentState::Uploaded));
    }

    #[test]
    fn renormalization_rolls_back_to_normalized() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Normalized);
        let permit = lifecycle.begin_normalization(id).unwrap();
        assert_eq!(lifecycle.state(id), Some(DocumentState::Normalizing));
        lifecycle.complete_normalization(permit, false).unwrap();
        assert_eq!(lifecycle.state(id), Some(DocumentState::Normalized));
    }

    #[test]
    fn reextraction_from_normalized() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Normalized);
        let permit = lifecycle.begin_extraction(id).unwrap();
        assert_eq!(permit.settle(true), DocumentState::Extracted);
    }

    #[test]
    fn dropped_permit_rolls_back() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Extracted);
        {
            let _permit = lifecycle.begin_normalization(id).unwrap();
            assert_eq!(lifecycle.state(id), Some(DocumentState::Normalizing));
        }
        assert_eq!(lifecycle.state(id), Some(DocumentState::Extracted));
    }

    #[test]
    fn mismatched_completion_is_rejected_and_rolls_back() {
        let (lifecycle, id) = lifecycle_with(DocumentState::Uploaded);
        let permit = lifecycle.begin_extraction(id).unwrap();
        assert!(lifecycle.complete_normalization(permit, true).is_err());
        assert_eq!(lifecycle.state(id), Some(DocumentState::Uploaded));
    }

    #[test]
    fn unknown_document() {
        let lifecycle = DocumentLifecycle::new();
        let err = lifecycle.begin_extraction(DocumentId::new()).unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownDocument(_)));
    }
}
