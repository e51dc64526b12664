//! Durable progress record and its resume contract.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Operation, Strategy, TransferMode};
use crate::errors::BatchError;
use crate::planner::SortPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub folder_name: String,
    pub file_count: usize,
}

/// What a run intends to do, recorded before the first file is touched.
#[derive(Debug, Clone)]
pub struct PlanSpec {
    pub folder_path: PathBuf,
    pub output_dir: PathBuf,
    pub mode: TransferMode,
    pub strategy: Strategy,
    pub operations: Vec<Operation>,
    pub batch_info: Vec<BatchInfo>,
    pub prefix: String,
    pub sort_by: SortPolicy,
    pub max_files_per_batch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub operation_id: String,
    pub started_at: DateTime<Utc>,
    pub folder_path: PathBuf,
    pub output_dir: PathBuf,
    pub mode: TransferMode,
    pub strategy: Strategy,
    pub total_files: usize,
    pub all_operations: Vec<Operation>,
    pub batch_info: Vec<BatchInfo>,
    /// Append-only during a run
    pub processed_file_names: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
    pub prefix: String,
    pub sort_by: SortPolicy,
    pub max_files_per_batch: usize,
}

impl ProgressRecord {
    pub(super) fn from_plan(operation_id: String, plan: PlanSpec) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            started_at: now,
            total_files: plan.operations.len(),
            folder_path: plan.folder_path,
            output_dir: plan.output_dir,
            mode: plan.mode,
            strategy: plan.strategy,
            all_operations: plan.operations,
            batch_info: plan.batch_info,
            processed_file_names: BTreeSet::new(),
            last_updated: now,
            prefix: plan.prefix,
            sort_by: plan.sort_by,
            max_files_per_batch: plan.max_files_per_batch,
        }
    }

    /// Operations whose file name has not been recorded as processed, in plan order.
    pub fn remaining_operations(&self) -> Vec<Operation> {
        self.all_operations
            .iter()
            .filter(|op| !self.processed_file_names.contains(&op.file_name))
            .cloned()
            .collect()
    }

    /// Operations already completed, in plan order.
    pub fn processed_operations(&self) -> Vec<Operation> {
        self.all_operations
            .iter()
            .filter(|op| self.processed_file_names.contains(&op.file_name))
            .cloned()
            .collect()
    }

    /// The record must describe its own plan consistently.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.total_files != self.all_operations.len() {
            return Err(BatchError::LedgerInconsistent(format!(
                "total_files is {} but {} operations are recorded",
                self.total_files,
                self.all_operations.len()
            )));
        }
        let names: BTreeSet<&str> = self
            .all_operations
            .iter()
            .map(|op| op.file_name.as_str())
            .collect();
        if names.len() != self.all_operations.len() {
            return Err(BatchError::LedgerInconsistent(
                "duplicate file names in recorded operations".to_string(),
            ));
        }
        if let Some(stray) = self
            .processed_file_names
            .iter()
            .find(|n| !names.contains(n.as_str()))
        {
            return Err(BatchError::LedgerInconsistent(format!(
                "processed file {stray:?} is not part of the plan"
            )));
        }
        Ok(())
    }

    pub fn summary(&self) -> InterruptedSummary {
        InterruptedSummary {
            operation_id: self.operation_id.clone(),
            started_at: self.started_at,
            last_updated: self.last_updated,
            folder_path: self.folder_path.clone(),
            output_dir: self.output_dir.clone(),
            mode: self.mode,
            strategy: self.strategy,
            total_files: self.total_files,
            processed_files: self.processed_file_names.len(),
            remaining_files: self.total_files.saturating_sub(self.processed_file_names.len()),
            batch_count: self.batch_info.len(),
            prefix: self.prefix.clone(),
            sort_by: self.sort_by,
            max_files_per_batch: self.max_files_per_batch,
        }
    }
}

/// Caller-facing description of an interrupted run.
#[derive(Debug, Clone, Serialize)]
pub struct InterruptedSummary {
    pub operation_id: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub folder_path: PathBuf,
    pub output_dir: PathBuf,
    pub mode: TransferMode,
    pub strategy: Strategy,
    pub total_files: usize,
    pub processed_files: usize,
    pub remaining_files: usize,
    pub batch_count: usize,
    pub prefix: String,
    pub sort_by: SortPolicy,
    pub max_files_per_batch: usize,
}
