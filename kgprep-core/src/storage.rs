use crate::types::DocumentId;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Which derived text an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStage {
    Raw,
    Normalized,
}

impl ArtifactStage {
    fn dir_name(self) -> &'static str {
        match self {
            ArtifactStage::Raw => "raw",
            ArtifactStage::Normalized => "normalized",
        }
    }
}

impl fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Metadata stored alongside each text artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub document_id: DocumentId,
    pub stage: ArtifactStage,
    pub sha256: String,
    pub bytes: usize,
    /// Present for normalized artifacts
    pub word_count: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    fn describe(
        document_id: DocumentId,
        stage: ArtifactStage,
        text: &str,
        word_count: Option<usize>,
    ) -> Self {
        Self {
            document_id,
            stage,
            sha256: calculate_text_hash(text),
            bytes: text.len(),
            word_count,
            created_at: Utc::now(),
        }
    }
}

/// Storage for the raw and normalized text derived from a document.
/// Artifacts are recomputed on each run and overwrite earlier ones.
pub trait ArtifactStore {
    fn write_text(
        &self,
        id: DocumentId,
        stage: ArtifactStage,
        text: &str,
        word_count: Option<usize>,
    ) -> Result<ArtifactRecord>;

    fn read_text(&self, id: DocumentId, stage: ArtifactStage) -> Result<Option<String>>;

    fn record(&self, id: DocumentId, stage: ArtifactStage) -> Result<Option<ArtifactRecord>>;

    /// Remove an artifact if present.
    fn remove(&self, id: DocumentId, stage: ArtifactStage) -> Result<()>;
}

/// File-based storage under `<root>/texts/{raw,normalized}/`.
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for stage in [ArtifactStage::Raw, ArtifactStage::Normalized] {
            let dir = root.join("texts").join(stage.dir_name());
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn text_path(&self, id: DocumentId, stage: ArtifactStage) -> PathBuf {
        self.stage_dir(stage).join(format!("{id}.txt"))
    }

    fn record_path(&self, id: DocumentId, stage: ArtifactStage) -> PathBuf {
        self.stage_dir(stage).join(format!("{id}.json"))
    }

    fn stage_dir(&self, stage: ArtifactStage) -> PathBuf {
        self.root.join("texts").join(stage.dir_name())
    }
}

/// Write through a sibling temp file so readers never see a partial file.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        fs::remove_file(&tmp).ok();
        return Err(anyhow!("failed to move artifact into {}: {}", path.display(), e));
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!("failed to remove {}: {}", path.display(), e)),
    }
}

impl ArtifactStore for FileArtifactStore {
    fn write_text(
        &self,
        id: DocumentId,
        stage: ArtifactStage,
        text: &str,
        word_count: Option<usize>,
    ) -> Result<ArtifactRecord> {
        let record = ArtifactRecord::describe(id, stage, text, word_count);
        let json_str = serde_json::to_string_pretty(&record)
            .map_err(|e| anyhow!("Failed to serialize ArtifactRecord: {}", e))?;

        let text_path = self.text_path(id, stage);
        let record_path = self.record_path(id, stage);
        write_atomically(&text_path, text.as_bytes())?;
        if let Err(e) = write_atomically(&record_path, json_str.as_bytes()) {
            // A text file without its record is not an artifact
            remove_if_exists(&text_path).ok();
            remove_if_exists(&record_path).ok();
            return Err(e);
        }
        Ok(record)
    }

    fn read_text(&self, id: DocumentId, stage: ArtifactStage) -> Result<Option<String>> {
        let path = self.text_path(id, stage);
        if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(Some(text))
        } else {
            Ok(None)
        }
    }

    fn record(&self, id: DocumentId, stage: ArtifactStage) -> Result<Option<ArtifactRecord>> {
        let path = self.record_path(id, stage);
        if path.exists() {
            let json_str = fs::read_to_string(&path)?;
            let record: ArtifactRecord = serde_json::from_str(&json_str)
                .map_err(|e| anyhow!("Failed to deserialize ArtifactRecord: {}", e))?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    fn remove(&self, id: DocumentId, stage: ArtifactStage) -> Result<()> {
        remove_if_exists(&self.text_path(id, stage))?;
        remove_if_exists(&self.record_path(id, stage))
    }
}

/// In-memory storage for tests and embedding.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<(DocumentId, ArtifactStage), (String, ArtifactRecord)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn write_text(
        &self,
        id: DocumentId,
        stage: ArtifactStage,
        text: &str,
        word_count: Option<usize>,
    ) -> Result<ArtifactRecord> {
        let record = ArtifactRecord::describe(id, stage, text, word_count);
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((id, stage), (text.to_string(), record.clone()));
        Ok(record)
    }

    fn read_text(&self, id: DocumentId, stage: ArtifactStage) -> Result<Option<String>> {
        let artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts.get(&(id, stage)).map(|(text, _)| text.clone()))
    }

    fn record(&self, id: DocumentId, stage: ArtifactStage) -> Result<Option<ArtifactRecord>> {
        let artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts.get(&(id, stage)).map(|(_, record)| record.clone()))
    }

    fn remove(&self, id: DocumentId, stage: ArtifactStage) -> Result<()> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(id, stage));
        Ok(())
    }
}

/// SHA-256 of the UTF-8 text, hex encoded
pub fn calculate_text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn text_hash_consistency() {
        assert_eq!(calculate_text_hash("知识图谱"), calculate_text_hash("知识图谱"));
        assert_ne!(calculate_text_hash("知识图谱"), calculate_text_hash("知识图谱。"));
    }

    #[test]
    fn file_store_roundtrip_and_layout() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = DocumentId::new();

        let record = store
            .write_text(id, ArtifactStage::Normalized, "知识图谱。", Some(4))
            .unwrap();
        assert_eq!(record.bytes, "知识图谱。".len());
        assert_eq!(record.word_count, Some(4));

        let path = dir.path().join("texts/normalized").join(format!("{id}.txt"));
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        assert_eq!(
            store.read_text(id, ArtifactStage::Normalized).unwrap().as_deref(),
            Some("知识图谱。")
        );
        assert_eq!(store.record(id, ArtifactStage::Normalized).unwrap(), Some(record));
        assert_eq!(store.read_text(id, ArtifactStage::Raw).unwrap(), None);
    }

    #[test]
    fn rewrite_replaces_previous_artifact() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = DocumentId::new();

        store.write_text(id, ArtifactStage::Raw, "first", None).unwrap();
        store.write_text(id, ArtifactStage::Raw, "second", None).unwrap();
        assert_eq!(
            store.read_text(id, ArtifactStage::Raw).unwrap().as_deref(),
            Some("second")
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = DocumentId::new();

        store.write_text(id, ArtifactStage::Raw, "text", None).unwrap();
        store.remove(id, ArtifactStage::Raw).unwrap();
        store.remove(id, ArtifactStage::Raw).unwrap();
        assert_eq!(store.read_text(id, ArtifactStage::Raw).unwrap(), None);
        assert_eq!(store.record(id, ArtifactStage::Raw).unwrap(), None);
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryArtifactStore::new();
        let id = DocumentId::new();
        store.write_text(id, ArtifactStage::Raw, "raw", None).unwrap();
        assert_eq!(store.read_text(id, ArtifactStage::Raw).unwrap().as_deref(), Some("raw"));
        store.remove(id, ArtifactStage::Raw).unwrap();
        assert_eq!(store.read_text(id, ArtifactStage::Raw).unwrap(), None);
    }

    #[test]
    fn failed_record_write_leaves_no_text() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path()).unwrap();
        let id = DocumentId::new();
        // A directory where the record should go makes the rename fail
        fs::create_dir(store.record_path(id, ArtifactStage::Raw)).unwrap();

        let result = store.write_text(id, ArtifactStage::Raw, "文本", None);
        assert!(result.is_err());
        assert!(!store.text_path(id, ArtifactStage::Raw).exists());
        assert_eq!(store.read_text(id, ArtifactStage::Raw).unwrap(), None);
    }
}
