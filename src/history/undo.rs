//! Reverse a completed move from its manifest.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{HistoryManager, UndoManifest};
use crate::engine::{self, FileError, RunContext, Strategy, TransferMode};

/// Outcome of an undo.
#[derive(Debug, Clone, Serialize)]
pub struct UndoReport {
    pub operation_id: String,
    pub restored: usize,
    pub total: usize,
    pub errors: Vec<FileError>,
    pub error_count: usize,
    pub cancelled: bool,
    pub strategy: Strategy,
    /// Batch folders deleted because they ended up empty
    pub removed_folders: Vec<PathBuf>,
    /// Batch folders kept because something else is still inside
    pub retained_folders: Vec<PathBuf>,
}

impl UndoReport {
    pub fn success(&self) -> bool {
        !self.cancelled && self.error_count == 0
    }
}

impl HistoryManager {
    /// Move every file in the manifest back to its original path.
    ///
    /// On full success the manifest and its index entry are deleted. Otherwise
    /// the manifest is rewritten with only the entries still to restore.
    pub fn undo(&self, operation_id: &str, ctx: &RunContext<'_>) -> Result<UndoReport> {
        let manifest = self.load_manifest(operation_id)?;
        let ops: Vec<_> = manifest.operations.iter().map(|e| e.inverse()).collect();
        let strategy = engine::select_strategy(TransferMode::Move, ops.first());
        info!(
            operation_id = %operation_id,
            files = ops.len(),
            strategy = %strategy,
            "undoing batch operation"
        );

        let report = engine::execute(&ops, strategy, ctx)?;
        let (removed_folders, retained_folders) = cleanup_batch_folders(&manifest);

        let restored: HashSet<&PathBuf> = report.completed.iter().map(|op| &op.source_path).collect();
        if report.success() {
            self.forget(operation_id)?;
        } else {
            let remaining = UndoManifest {
                operations: manifest
                    .operations
                    .iter()
                    .filter(|e| !restored.contains(&e.current_path))
                    .cloned()
                    .collect(),
                ..manifest.clone()
            };
            if remaining.operations.is_empty() {
                self.forget(operation_id)?;
            } else {
                debug!(
                    operation_id = %operation_id,
                    remaining = remaining.operations.len(),
                    "keeping manifest for unfinished undo"
                );
                self.rewrite(&remaining)?;
            }
        }

        Ok(UndoReport {
            operation_id: operation_id.to_string(),
            restored: report.processed,
            total: report.total,
            errors: report.errors,
            error_count: report.error_count,
            cancelled: report.cancelled,
            strategy,
            removed_folders,
            retained_folders,
        })
    }
}

/// Remove empty batch folders; report the ones that still hold something.
///
/// Partial temp copies of manifest files (left by an interrupted copy) do not
/// count as content and are deleted first.
fn cleanup_batch_folders(manifest: &UndoManifest) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut names_by_folder: HashMap<&Path, HashSet<&str>> = HashMap::new();
    for entry in &manifest.operations {
        if let Some(dir) = entry.current_path.parent() {
            names_by_folder.entry(dir).or_default().insert(entry.file_name.as_str());
        }
    }

    let mut removed = Vec::new();
    let mut retained = Vec::new();
    for folder in &manifest.batch_folders {
        if let Some(names) = names_by_folder.get(folder.as_path()) {
            sweep_partial_copies(folder, names);
        }
        let is_empty = match fs::read_dir(folder) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => continue,
        };
        if !is_empty {
            retained.push(folder.clone());
            continue;
        }
        match fs::remove_dir(folder) {
            Ok(()) => removed.push(folder.clone()),
            Err(e) => {
                warn!(folder = %folder.display(), error = %e, "could not remove empty batch folder");
                retained.push(folder.clone());
            }
        }
    }
    (removed, retained)
}

/// Delete `.<name>.tmp.*` files in `folder` whose `<name>` is one of `names`.
fn sweep_partial_copies(folder: &Path, names: &HashSet<&str>) {
    let Ok(entries) = fs::read_dir(folder) else {
        return;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(target) = name
            .strip_prefix('.')
            .and_then(|rest| rest.rfind(".tmp.").map(|i| &rest[..i]))
        else {
            continue;
        };
        if names.contains(target) {
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed partial copy"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial copy"),
            }
        }
    }
}
