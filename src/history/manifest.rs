//! Undo manifests and the capped history index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::Operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file_name: String,
    pub original_path: PathBuf,
    pub current_path: PathBuf,
}

impl ManifestEntry {
    /// Operation that puts the file back where it came from.
    pub fn inverse(&self) -> Operation {
        Operation {
            file_name: self.file_name.clone(),
            source_path: self.current_path.clone(),
            dest_path: self.original_path.clone(),
            batch_index: 0,
        }
    }
}

/// Everything needed to reverse one completed move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoManifest {
    pub operation_id: String,
    pub created_at: DateTime<Utc>,
    pub source_folder: PathBuf,
    pub output_dir: PathBuf,
    pub operations: Vec<ManifestEntry>,
    pub batch_folders: Vec<PathBuf>,
}

impl UndoManifest {
    pub fn from_operations(
        operation_id: &str,
        source_folder: &Path,
        output_dir: &Path,
        completed: &[Operation],
    ) -> Self {
        let operations: Vec<ManifestEntry> = completed
            .iter()
            .map(|op| ManifestEntry {
                file_name: op.file_name.clone(),
                original_path: op.source_path.clone(),
                current_path: op.dest_path.clone(),
            })
            .collect();
        let mut batch_folders: Vec<PathBuf> = Vec::new();
        for entry in &operations {
            if let Some(dir) = entry.current_path.parent()
                && !batch_folders.iter().any(|d| d == dir)
            {
                batch_folders.push(dir.to_path_buf());
            }
        }
        Self {
            operation_id: operation_id.to_string(),
            created_at: Utc::now(),
            source_folder: source_folder.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            operations,
            batch_folders,
        }
    }

    pub fn summary(&self) -> HistorySummary {
        let mut counts: BTreeMap<&Path, usize> = BTreeMap::new();
        for entry in &self.operations {
            if let Some(dir) = entry.current_path.parent() {
                *counts.entry(dir).or_default() += 1;
            }
        }
        let batch_folders = self
            .batch_folders
            .iter()
            .map(|folder| FolderCount {
                folder: folder.clone(),
                file_count: counts.get(folder.as_path()).copied().unwrap_or(0),
            })
            .collect();
        HistorySummary {
            operation_id: self.operation_id.clone(),
            created_at: self.created_at,
            file_count: self.operations.len(),
            batch_count: self.batch_folders.len(),
            batch_folders,
            source_folder: self.source_folder.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderCount {
    pub folder: PathBuf,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub operation_id: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub batch_count: usize,
    pub batch_folders: Vec<FolderCount>,
    pub source_folder: PathBuf,
    pub output_dir: PathBuf,
}

/// Newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryIndex {
    pub entries: Vec<HistorySummary>,
}

impl HistoryIndex {
    /// Insert at the front, replacing an entry with the same id. Returns evicted ids.
    pub fn push_front(&mut self, summary: HistorySummary, limit: usize) -> Vec<String> {
        self.entries.retain(|e| e.operation_id != summary.operation_id);
        self.entries.insert(0, summary);
        if self.entries.len() > limit {
            self.entries
                .split_off(limit)
                .into_iter()
                .map(|e| e.operation_id)
                .collect()
        } else {
            Vec::new()
        }
    }

    pub fn remove(&mut self, operation_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.operation_id != operation_id);
        before != self.entries.len()
    }

    pub fn replace(&mut self, summary: HistorySummary) {
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|e| e.operation_id == summary.operation_id)
        {
            *slot = summary;
        }
    }
}

/// Result of sampling a manifest's current paths.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Every sampled file is still where the manifest says
    pub valid: bool,
    pub checked: usize,
    pub found: usize,
    pub missing: Vec<PathBuf>,
}
