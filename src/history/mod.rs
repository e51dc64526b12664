//! Rollback history: one undo manifest per completed move plus a capped,
//! newest-first index of their summaries.
//!
//! Layout under the state directory:
//! - `manifests/<operation_id>.json`
//! - `history.json`
//!
//! Both are sealed like the progress ledger. A record that fails
//! verification is deleted and treated as absent.

mod manifest;
mod undo;

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::engine::{Operation, TransferMode};
use crate::errors::BatchError;
use crate::seal::StateStore;

pub use manifest::{
    FolderCount, HistoryIndex, HistorySummary, ManifestEntry, UndoManifest, ValidationReport,
};
pub use undo::UndoReport;

pub const HISTORY_FILE: &str = "history.json";
pub const MANIFEST_DIR: &str = "manifests";
/// Upper bound on entries probed by `validate_manifest`.
pub const VALIDATION_SAMPLE: usize = 10;

/// Operation ids are UUIDs; anything else could escape the manifest directory.
pub fn validate_operation_id(id: &str) -> Result<(), BatchError> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| BatchError::InvalidOperationId(id.to_string()))
}

fn manifest_rel(id: &str) -> String {
    format!("{MANIFEST_DIR}/{id}.json")
}

#[derive(Debug, Clone)]
pub struct HistoryManager {
    store: StateStore,
    limit: usize,
}

impl HistoryManager {
    pub fn new(store: StateStore, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }

    /// Persist an undo manifest for a completed move and index it.
    ///
    /// Copies are not undoable and produce nothing; neither does an empty run.
    pub fn save_manifest(
        &self,
        operation_id: &str,
        mode: TransferMode,
        source_folder: &Path,
        output_dir: &Path,
        completed: &[Operation],
    ) -> Result<Option<HistorySummary>> {
        if mode == TransferMode::Copy || completed.is_empty() {
            return Ok(None);
        }
        validate_operation_id(operation_id)?;
        let manifest =
            UndoManifest::from_operations(operation_id, source_folder, output_dir, completed);
        self.store.write(&manifest_rel(operation_id), &manifest)?;

        let summary = manifest.summary();
        let mut index = self.load_index()?;
        let evicted = index.push_front(summary.clone(), self.limit);
        self.store.write(HISTORY_FILE, &index)?;
        for id in evicted {
            debug!(operation_id = %id, "evicting old undo manifest");
            if let Err(e) = self.store.remove(&manifest_rel(&id)) {
                warn!(operation_id = %id, error = %e, "could not delete evicted manifest");
            }
        }
        info!(
            operation_id = %operation_id,
            files = summary.file_count,
            batches = summary.batch_count,
            "undo manifest saved"
        );
        Ok(Some(summary))
    }

    fn load_index(&self) -> Result<HistoryIndex> {
        Ok(self.store.read(HISTORY_FILE)?.unwrap_or_default())
    }

    /// Summaries, newest first. Reads only the index.
    pub fn list_history(&self) -> Result<Vec<HistorySummary>> {
        Ok(self.load_index()?.entries)
    }

    pub fn latest(&self) -> Result<Option<HistorySummary>> {
        Ok(self.load_index()?.entries.into_iter().next())
    }

    /// Load a manifest; a missing or unreadable one also drops its index entry.
    pub fn load_manifest(&self, operation_id: &str) -> Result<UndoManifest> {
        validate_operation_id(operation_id)?;
        match self.store.read::<UndoManifest>(&manifest_rel(operation_id))? {
            Some(m) => Ok(m),
            None => {
                self.remove_index_entry(operation_id)?;
                Err(BatchError::ManifestNotFound(operation_id.to_string()).into())
            }
        }
    }

    /// Check up to [`VALIDATION_SAMPLE`] evenly spaced entries for presence at their current path.
    pub fn validate_manifest(&self, operation_id: &str) -> Result<ValidationReport> {
        let manifest = self.load_manifest(operation_id)?;
        Ok(sample_manifest(&manifest))
    }

    fn remove_index_entry(&self, operation_id: &str) -> Result<()> {
        let mut index = self.load_index()?;
        if index.remove(operation_id) {
            self.store.write(HISTORY_FILE, &index)?;
        }
        Ok(())
    }

    /// Drop a manifest and its index entry.
    pub(crate) fn forget(&self, operation_id: &str) -> Result<()> {
        self.store.remove(&manifest_rel(operation_id))?;
        self.remove_index_entry(operation_id)
    }

    /// Replace a manifest (after a partial undo) and refresh its index entry.
    pub(crate) fn rewrite(&self, manifest: &UndoManifest) -> Result<()> {
        self.store.write(&manifest_rel(&manifest.operation_id), manifest)?;
        let mut index = self.load_index()?;
        index.replace(manifest.summary());
        self.store.write(HISTORY_FILE, &index)
    }
}

fn sample_manifest(manifest: &UndoManifest) -> ValidationReport {
    let n = manifest.operations.len();
    let checked = n.min(VALIDATION_SAMPLE);
    let mut missing = Vec::new();
    for i in 0..checked {
        let entry = &manifest.operations[i * n / checked];
        if !entry.current_path.exists() {
            missing.push(entry.current_path.clone());
        }
    }
    ValidationReport {
        valid: missing.is_empty(),
        checked,
        found: checked - missing.len(),
        missing,
    }
}
