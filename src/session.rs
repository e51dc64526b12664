//! Caller-facing operations.
//!
//! A `Session` owns the state directory for its lifetime (advisory lock),
//! the progress ledger, the history manager and the shared cancel token.
//! Every entry point runs the path gate on the folders it is about to touch
//! before doing any I/O.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::engine::{
    self, EngineOptions, ExecutionReport, Operation, ProgressEvent, RunContext, Strategy,
    TransferMode,
};
use crate::errors::BatchError;
use crate::grouper::{self, Grouping};
use crate::history::{HistoryManager, HistorySummary, UndoReport, ValidationReport};
use crate::ledger::{BatchInfo, InterruptedSummary, PlanSpec, ProgressLedger, ProgressRecord};
use crate::lock::{StateLock, try_acquire_state_lock};
use crate::planner::{self, Batch, BatchPreview, FileInfo, PlanInputs, SortPolicy};
use crate::platform;
use crate::seal::StateStore;
use crate::shutdown::CancelToken;

/// Decides whether a folder may be touched at all.
pub trait PathGate: Send + Sync {
    fn is_path_allowed(&self, path: &Path) -> bool;
}

impl<F> PathGate for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_path_allowed(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Accepts every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PathGate for AllowAll {
    fn is_path_allowed(&self, _path: &Path) -> bool {
        true
    }
}

/// Accepts paths inside one of the configured roots (all paths when empty).
#[derive(Debug, Clone, Default)]
pub struct RootsGate {
    roots: Vec<PathBuf>,
}

impl RootsGate {
    pub fn new(roots: &[PathBuf]) -> Self {
        let roots = roots
            .iter()
            .map(|r| dunce::canonicalize(r).unwrap_or_else(|_| r.clone()))
            .collect();
        Self { roots }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.allowed_roots)
    }
}

impl PathGate for RootsGate {
    fn is_path_allowed(&self, path: &Path) -> bool {
        if self.roots.is_empty() {
            return true;
        }
        // Resolve through the nearest existing ancestor so new output dirs can be checked.
        let Some(anchor) = platform::nearest_existing_ancestor(path) else {
            return false;
        };
        let Ok(canon) = dunce::canonicalize(&anchor) else {
            return false;
        };
        let rest = path.strip_prefix(&anchor).unwrap_or(Path::new(""));
        if rest.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return false;
        }
        let full = canon.join(rest);
        self.roots.iter().any(|root| full.starts_with(root))
    }
}

/// Parameters of a new batch run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub folder: PathBuf,
    /// Defaults to `folder`
    pub output_dir: Option<PathBuf>,
    pub max_files_per_batch: usize,
    pub prefix: String,
    pub sort_by: SortPolicy,
    pub mode: TransferMode,
}

impl BatchRequest {
    /// Request for `folder` using the configured defaults (move mode).
    pub fn new(folder: impl Into<PathBuf>, cfg: &Config) -> Self {
        Self {
            folder: folder.into(),
            output_dir: None,
            max_files_per_batch: cfg.max_files_per_batch,
            prefix: cfg.batch_prefix.clone(),
            sort_by: cfg.sort_by,
            mode: TransferMode::Move,
        }
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.folder)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub folder: PathBuf,
    pub total_files: usize,
    pub media_files: usize,
    pub skipped_files: usize,
    pub groups: usize,
    pub total_bytes: u64,
    /// Stopped before grouping finished; the counts are empty
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// `None` when cancelled before the plan was recorded
    pub operation_id: Option<String>,
    pub mode: TransferMode,
    pub batch_count: usize,
    pub report: ExecutionReport,
    /// Present after a move that left something to undo
    pub undo: Option<HistorySummary>,
    /// The ledger survives a cancelled run so it can be resumed
    pub resumable: bool,
}

impl BatchOutcome {
    /// Cancelled while grouping or packing: nothing was recorded or touched.
    fn cancelled_before_start(mode: TransferMode) -> Self {
        Self {
            operation_id: None,
            mode,
            batch_count: 0,
            report: ExecutionReport {
                processed: 0,
                total: 0,
                errors: Vec::new(),
                error_count: 0,
                cancelled: true,
                strategy: engine::select_strategy(mode, None),
                completed: Vec::new(),
            },
            undo: None,
            resumable: false,
        }
    }
}

/// Turn a cooperative stop into `None`; other errors pass through.
fn unless_cancelled<T>(result: Result<T, BatchError>) -> Result<Option<T>, BatchError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(BatchError::Cancelled) => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct Session {
    config: Config,
    gate: Box<dyn PathGate>,
    ledger: ProgressLedger,
    history: HistoryManager,
    cancel: CancelToken,
    classification: Option<HashMap<String, bool>>,
    timestamps: Option<HashMap<String, i64>>,
    _lock: StateLock,
}

impl Session {
    /// Lock the state directory and open durable state.
    pub fn open(config: &Config, gate: impl PathGate + 'static) -> Result<Self> {
        let state_dir = &config.state_dir;
        fs::create_dir_all(state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        let _ = platform::set_dir_mode_0700(state_dir);
        let lock = try_acquire_state_lock(state_dir)
            .with_context(|| format!("lock state dir {}", state_dir.display()))?
            .ok_or_else(|| BatchError::StateLocked(state_dir.clone()))?;
        let store = StateStore::open(state_dir, config.encrypt_state)?;
        debug!(state_dir = %state_dir.display(), encrypt = config.encrypt_state, "session opened");
        Ok(Self {
            config: config.clone(),
            gate: Box::new(gate),
            ledger: ProgressLedger::new(store.clone()),
            history: HistoryManager::new(store, config.history_limit),
            cancel: CancelToken::new(),
            classification: None,
            timestamps: None,
            _lock: lock,
        })
    }

    /// Flagged files (`true`) are planned into their own batches.
    pub fn with_classification(mut self, flags: HashMap<String, bool>) -> Self {
        self.classification = Some(flags);
        self
    }

    /// Capture timestamps (epoch millis) that override file mtimes for date sorting.
    pub fn with_timestamps(mut self, timestamps: HashMap<String, i64>) -> Self {
        self.timestamps = Some(timestamps);
        self
    }

    /// Shared token; cancelling it stops the running operation cooperatively.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn check_gate(&self, path: &Path) -> Result<(), BatchError> {
        if self.gate.is_path_allowed(path) {
            Ok(())
        } else {
            warn!(path = %path.display(), "path rejected by security gate");
            Err(BatchError::PathRejected(path.to_path_buf()))
        }
    }

    fn engine_options(&self) -> EngineOptions {
        EngineOptions::from(&self.config)
    }

    /// Count and group the media files directly inside `folder`.
    pub fn scan(&self, folder: &Path) -> Result<ScanSummary> {
        self.check_gate(folder)?;
        let _rearm = self.cancel.rearm_on_exit();
        let names = list_file_names(folder)?;
        let Some(grouping) = unless_cancelled(grouper::group_files(&names, &self.cancel))? else {
            info!(folder = %folder.display(), "scan cancelled");
            return Ok(ScanSummary {
                folder: folder.to_path_buf(),
                total_files: names.len(),
                media_files: 0,
                skipped_files: 0,
                groups: 0,
                total_bytes: 0,
                cancelled: true,
            });
        };
        let total_bytes: u64 = grouping
            .groups
            .par_iter()
            .flat_map_iter(|(_, files)| files.iter())
            .filter_map(|name| fs::metadata(folder.join(name)).ok())
            .map(|m| m.len())
            .sum();
        Ok(ScanSummary {
            folder: folder.to_path_buf(),
            total_files: names.len(),
            media_files: grouping.accepted,
            skipped_files: grouping.skipped,
            groups: grouping.groups.len(),
            total_bytes,
            cancelled: false,
        })
    }

    /// Dry-run plan for `folder`.
    pub fn preview_batches(
        &self,
        folder: &Path,
        max_files_per_batch: usize,
        sort_by: SortPolicy,
    ) -> Result<BatchPreview> {
        if max_files_per_batch == 0 {
            return Err(BatchError::InvalidCeiling(max_files_per_batch).into());
        }
        self.check_gate(folder)?;
        let _rearm = self.cancel.rearm_on_exit();
        let Some((grouping, batches)) = self.plan(folder, max_files_per_batch, sort_by)? else {
            info!(folder = %folder.display(), "preview cancelled");
            return Ok(BatchPreview::cancelled());
        };
        Ok(BatchPreview::build(
            &batches,
            max_files_per_batch,
            &self.config.batch_prefix,
            grouping.skipped,
        ))
    }

    fn plan(
        &self,
        folder: &Path,
        max_files_per_batch: usize,
        sort_by: SortPolicy,
    ) -> Result<Option<(Grouping, Vec<Batch>)>> {
        let names = list_file_names(folder)?;
        let Some(grouping) = unless_cancelled(grouper::group_files(&names, &self.cancel))? else {
            return Ok(None);
        };
        let info = match sort_by {
            SortPolicy::NameAsc | SortPolicy::NameDesc => None,
            _ => Some(self.collect_file_info(folder, &grouping)),
        };
        let inputs = PlanInputs {
            file_info: info.as_ref(),
            flags: self.classification.as_ref(),
        };
        let packed = planner::plan_batches(
            &grouping.groups,
            max_files_per_batch,
            sort_by,
            &inputs,
            &self.cancel,
        );
        Ok(unless_cancelled(packed)?.map(|batches| (grouping, batches)))
    }

    fn collect_file_info(&self, folder: &Path, grouping: &Grouping) -> HashMap<String, FileInfo> {
        let mut info: HashMap<String, FileInfo> = grouping
            .groups
            .par_iter()
            .flat_map_iter(|(_, files)| files.iter())
            .filter_map(|name| {
                let meta = fs::metadata(folder.join(name)).ok()?;
                let modified_ms = meta
                    .modified()
                    .ok()
                    .map(|t| DateTime::<Utc>::from(t).timestamp_millis());
                Some((
                    name.clone(),
                    FileInfo {
                        modified_ms,
                        size: Some(meta.len()),
                    },
                ))
            })
            .collect();
        if let Some(ts) = &self.timestamps {
            for (name, ms) in ts {
                if let Some(entry) = info.get_mut(name) {
                    entry.modified_ms = Some(*ms);
                }
            }
        }
        info
    }

    /// Plan, record and execute a new batch run.
    pub fn execute_batch(
        &self,
        req: &BatchRequest,
        progress: Option<&Sender<ProgressEvent>>,
    ) -> Result<BatchOutcome> {
        if req.max_files_per_batch == 0 {
            return Err(BatchError::InvalidCeiling(req.max_files_per_batch).into());
        }
        planner::validate_prefix(&req.prefix)?;
        let folder = req.folder.as_path();
        let output = req.output_dir();
        self.check_gate(folder)?;
        self.check_gate(output)?;

        if let Some(pending) = self.ledger.load()? {
            return Err(BatchError::InterruptedPending(pending.operation_id).into());
        }
        let _rearm = self.cancel.rearm_on_exit();

        let Some((_, batches)) = self.plan(folder, req.max_files_per_batch, req.sort_by)? else {
            info!(folder = %folder.display(), "batch operation cancelled while planning");
            return Ok(BatchOutcome::cancelled_before_start(req.mode));
        };
        if batches.is_empty() {
            return Err(BatchError::NothingToDo(folder.to_path_buf()).into());
        }
        let ops = planner::flatten(&batches, folder, output, &req.prefix);
        let batch_info = planner::folder_names(&batches, &req.prefix)
            .into_iter()
            .zip(&batches)
            .map(|(folder_name, b)| BatchInfo {
                folder_name,
                file_count: b.file_count,
            })
            .collect();
        let strategy = engine::select_strategy(req.mode, ops.first());

        let operation_id = self.ledger.start(PlanSpec {
            folder_path: folder.to_path_buf(),
            output_dir: output.to_path_buf(),
            mode: req.mode,
            strategy,
            operations: ops.clone(),
            batch_info,
            prefix: req.prefix.clone(),
            sort_by: req.sort_by,
            max_files_per_batch: req.max_files_per_batch,
        })?;
        info!(
            operation_id = %operation_id,
            folder = %folder.display(),
            output = %output.display(),
            mode = %req.mode,
            batches = batches.len(),
            files = ops.len(),
            "batch operation started"
        );

        let report = self.run(&ops, strategy, progress)?;
        self.finalize(report)
    }

    /// Continue the interrupted operation with its completed files excluded.
    pub fn resume_batch(&self, progress: Option<&Sender<ProgressEvent>>) -> Result<BatchOutcome> {
        let record = self
            .ledger
            .load()?
            .ok_or(BatchError::NoInterruptedOperation)?;
        self.check_gate(&record.folder_path)?;
        self.check_gate(&record.output_dir)?;
        let _rearm = self.cancel.rearm_on_exit();

        let remaining = record.remaining_operations();
        let strategy = engine::select_strategy(record.mode, remaining.first());
        if strategy != record.strategy {
            debug!(recorded = %record.strategy, current = %strategy, "strategy re-derived differently");
        }
        info!(
            operation_id = %record.operation_id,
            remaining = remaining.len(),
            processed = record.processed_file_names.len(),
            "resuming batch operation"
        );
        let report = self.run(&remaining, strategy, progress)?;
        self.finalize(report)
    }

    fn run(
        &self,
        ops: &[Operation],
        strategy: Strategy,
        progress: Option<&Sender<ProgressEvent>>,
    ) -> Result<ExecutionReport> {
        let ctx = RunContext::new(self.engine_options(), &self.cancel)
            .with_ledger(&self.ledger)
            .with_progress(progress);
        Ok(engine::execute(ops, strategy, &ctx)?)
    }

    /// Keep the ledger after a cancel; otherwise persist undo data (move) and clear it.
    fn finalize(&self, report: ExecutionReport) -> Result<BatchOutcome> {
        let record: ProgressRecord = self
            .ledger
            .snapshot()
            .ok_or_else(|| BatchError::LedgerInconsistent("no active record".to_string()))?;

        let mut outcome = BatchOutcome {
            operation_id: Some(record.operation_id.clone()),
            mode: record.mode,
            batch_count: record.batch_info.len(),
            report,
            undo: None,
            resumable: false,
        };
        if outcome.report.cancelled {
            self.ledger.flush()?;
            outcome.resumable = true;
            info!(operation_id = %record.operation_id, "batch operation cancelled; progress kept for resume");
            return Ok(outcome);
        }

        outcome.undo = self.history.save_manifest(
            &record.operation_id,
            record.mode,
            &record.folder_path,
            &record.output_dir,
            &record.processed_operations(),
        )?;
        self.ledger.clear()?;
        info!(
            operation_id = %record.operation_id,
            processed = outcome.report.processed,
            errors = outcome.report.error_count,
            "batch operation completed"
        );
        Ok(outcome)
    }

    /// Request cancellation of the running operation.
    pub fn cancel_batch(&self) {
        info!("cancellation requested");
        self.cancel.cancel();
    }

    pub fn check_interrupted_progress(&self) -> Result<Option<InterruptedSummary>> {
        Ok(self.ledger.load()?.map(|r| r.summary()))
    }

    /// Drop the interrupted operation without touching any file. Returns whether one existed.
    ///
    /// A record that verifies but fails its consistency check is removed too;
    /// this is the way out of such a state.
    pub fn discard_interrupted_progress(&self) -> Result<bool> {
        let existed = match self.ledger.load() {
            Ok(record) => record.is_some(),
            Err(e) => {
                warn!(error = %e, "discarding progress ledger that failed to load");
                true
            }
        };
        self.ledger.clear()?;
        if existed {
            info!("interrupted batch operation discarded");
        }
        Ok(existed)
    }

    /// Undo `operation_id`, or the most recent operation when `None`.
    pub fn rollback(
        &self,
        operation_id: Option<&str>,
        progress: Option<&Sender<ProgressEvent>>,
    ) -> Result<UndoReport> {
        let id = match operation_id {
            Some(id) => id.to_string(),
            None => self
                .history
                .latest()?
                .map(|s| s.operation_id)
                .ok_or_else(|| BatchError::ManifestNotFound("latest".to_string()))?,
        };
        let manifest = self.history.load_manifest(&id)?;
        self.check_gate(&manifest.source_folder)?;
        self.check_gate(&manifest.output_dir)?;
        if let Some(pending) = self.ledger.load()? {
            return Err(BatchError::InterruptedPending(pending.operation_id).into());
        }
        let _rearm = self.cancel.rearm_on_exit();
        let ctx = RunContext::new(self.engine_options(), &self.cancel).with_progress(progress);
        self.history.undo(&id, &ctx)
    }

    pub fn list_history(&self) -> Result<Vec<HistorySummary>> {
        self.history.list_history()
    }

    pub fn validate_history_entry(&self, operation_id: &str) -> Result<ValidationReport> {
        let manifest = self.history.load_manifest(operation_id)?;
        self.check_gate(&manifest.source_folder)?;
        self.check_gate(&manifest.output_dir)?;
        self.history.validate_manifest(operation_id)
    }
}

/// Regular files directly inside `folder` (no recursion, symlinks not followed).
fn list_file_names(folder: &Path) -> Result<Vec<String>> {
    if !folder.is_dir() {
        return Err(BatchError::FolderNotFound(folder.to_path_buf()).into());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("list {}", folder.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) => names.push(name.to_string()),
            None => debug!(path = %entry.path().display(), "skipping non-UTF-8 file name"),
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roots_gate_accepts_only_inside_roots() {
        let dir = tempdir().unwrap();
        let allowed = dir.path().join("photos");
        fs::create_dir(&allowed).unwrap();
        let gate = RootsGate::new(&[allowed.clone()]);
        assert!(gate.is_path_allowed(&allowed));
        assert!(gate.is_path_allowed(&allowed.join("not_yet_created")));
        assert!(!gate.is_path_allowed(dir.path()));
        assert!(!gate.is_path_allowed(&allowed.join("new/../../escape")));
    }

    #[test]
    fn empty_roots_allow_everything() {
        assert!(RootsGate::default().is_path_allowed(Path::new("/anywhere")));
    }

    #[test]
    fn second_session_on_same_state_is_locked() {
        let dir = tempdir().unwrap();
        let cfg = Config::with_state_dir(dir.path().join("state"));
        let _first = Session::open(&cfg, AllowAll).unwrap();
        let err = Session::open(&cfg, AllowAll).err().expect("must be locked");
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::StateLocked(_))
        ));
    }
}
