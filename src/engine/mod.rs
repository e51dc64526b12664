//! Execution engine: relocate files for a flat list of planned operations.
//!
//! Three strategies, chosen once per run:
//! - `SameVolumeRename`: atomic rename in fixed-size chunks on the calling thread.
//! - `CrossVolumeMove`: verified copy to a temp sibling, rename into place,
//!   then delete the source. Runs on the worker pool.
//! - `Copy`: the cross-volume path without the delete.
//!
//! Per-file failures are collected and never abort the run. The only
//! request-level error is the disk-space pre-check.

mod chunked;
pub mod copy;
pub mod helpers;
mod io_copy;
mod pool;
mod tracker;
pub(crate) mod util;

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, MAX_CONCURRENCY};
use crate::errors::BatchError;
use crate::ledger::ProgressLedger;
use crate::platform;
use crate::shutdown::CancelToken;

pub use copy::transfer_verified;

/// Maximum number of per-file errors kept in a report.
pub const ERROR_SAMPLE: usize = 10;

/// Minimum spacing between progress events on the worker-pool path.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Move,
    Copy,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransferMode::Move => "move",
            TransferMode::Copy => "copy",
        })
    }
}

/// How files are physically relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    SameVolumeRename,
    CrossVolumeMove,
    Copy,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strategy::SameVolumeRename => "same-volume rename",
            Strategy::CrossVolumeMove => "cross-volume move",
            Strategy::Copy => "copy",
        })
    }
}

/// One planned file relocation. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub file_name: String,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub batch_index: usize,
}

/// A per-file failure captured in a report.
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub file_name: String,
    pub path: PathBuf,
    pub message: String,
}

/// Aggregate progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Operations attempted in this run (succeeded or failed)
    pub current: usize,
    /// Operations scheduled in this run
    pub total: usize,
    /// Files completed across the whole operation, including earlier attempts
    pub processed_files: usize,
    /// Files in the whole operation
    pub total_files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress(Progress),
    /// Last event of every run.
    Finished {
        processed: usize,
        total: usize,
        cancelled: bool,
    },
}

/// Tunables for one run.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub chunk_size: usize,
    pub concurrency: usize,
    pub flush_interval: Duration,
    /// Carry the source mtime onto copies (best-effort)
    pub preserve_mtime: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            chunk_size: cfg.chunk_size.max(1),
            concurrency: cfg.concurrency.clamp(1, MAX_CONCURRENCY),
            flush_interval: cfg.flush_interval,
            preserve_mtime: true,
        }
    }
}

/// Everything a run borrows from its caller.
pub struct RunContext<'a> {
    pub options: EngineOptions,
    pub cancel: &'a CancelToken,
    pub ledger: Option<&'a ProgressLedger>,
    pub progress: Option<&'a Sender<ProgressEvent>>,
}

impl<'a> RunContext<'a> {
    pub fn new(options: EngineOptions, cancel: &'a CancelToken) -> Self {
        Self {
            options,
            cancel,
            ledger: None,
            progress: None,
        }
    }

    pub fn with_ledger(mut self, ledger: &'a ProgressLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_progress(mut self, tx: Option<&'a Sender<ProgressEvent>>) -> Self {
        self.progress = tx;
        self
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub processed: usize,
    pub total: usize,
    /// First [`ERROR_SAMPLE`] failures
    pub errors: Vec<FileError>,
    pub error_count: usize,
    pub cancelled: bool,
    pub strategy: Strategy,
    #[serde(skip)]
    pub completed: Vec<Operation>,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        !self.cancelled && self.error_count == 0
    }
}

/// Pick the strategy for a run from its first operation.
///
/// Compares the source directory with the nearest existing ancestor of the
/// destination. If detection fails the copy-verify path is used.
pub fn select_strategy(mode: TransferMode, first: Option<&Operation>) -> Strategy {
    if mode == TransferMode::Copy {
        return Strategy::Copy;
    }
    let Some(op) = first else {
        return Strategy::SameVolumeRename;
    };
    let src = platform::nearest_existing_ancestor(parent_or_self(&op.source_path));
    let dst = platform::nearest_existing_ancestor(&op.dest_path);
    match (src, dst) {
        (Some(src), Some(dst)) => match platform::same_volume(&src, &dst) {
            Ok(true) => Strategy::SameVolumeRename,
            Ok(false) => Strategy::CrossVolumeMove,
            Err(e) => {
                warn!(error = %e, "volume detection failed; using copy-verify-delete");
                Strategy::CrossVolumeMove
            }
        },
        _ => Strategy::CrossVolumeMove,
    }
}

fn parent_or_self(p: &Path) -> &Path {
    p.parent().unwrap_or(p)
}

/// Relocate every operation with `strategy`.
pub fn execute(
    ops: &[Operation],
    strategy: Strategy,
    ctx: &RunContext<'_>,
) -> Result<ExecutionReport, BatchError> {
    if strategy != Strategy::SameVolumeRename {
        check_disk_space(ops)?;
    }
    info!(
        operations = ops.len(),
        strategy = %strategy,
        concurrency = ctx.options.concurrency,
        "executing batch operations"
    );
    let report = match strategy {
        Strategy::SameVolumeRename => chunked::run(ops, ctx),
        Strategy::CrossVolumeMove => pool::run(ops, true, ctx),
        Strategy::Copy => pool::run(ops, false, ctx),
    };
    let report = ExecutionReport { strategy, ..report };
    info!(
        processed = report.processed,
        total = report.total,
        errors = report.error_count,
        cancelled = report.cancelled,
        "execution finished"
    );
    Ok(report)
}

/// Reject copy-based runs whose sources would not fit at the destination.
fn check_disk_space(ops: &[Operation]) -> Result<(), BatchError> {
    let Some(first) = ops.first() else {
        return Ok(());
    };
    let Some(anchor) = platform::nearest_existing_ancestor(&first.dest_path) else {
        return Ok(());
    };
    let required: u64 = ops
        .iter()
        .filter_map(|op| std::fs::metadata(&op.source_path).ok())
        .map(|m| m.len())
        .sum();
    let available = match platform::available_space(&anchor) {
        Ok(n) => n,
        Err(e) => {
            warn!(path = %anchor.display(), error = %e, "could not determine free space");
            return Ok(());
        }
    };
    if required > available {
        return Err(BatchError::InsufficientSpace {
            required,
            available,
            dest: anchor,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn op(src: &Path, dst: &Path, name: &str) -> Operation {
        Operation {
            file_name: name.to_string(),
            source_path: src.join(name),
            dest_path: dst.join("batch_001").join(name),
            batch_index: 0,
        }
    }

    #[test]
    fn copy_mode_always_copies() {
        assert_eq!(select_strategy(TransferMode::Copy, None), Strategy::Copy);
    }

    #[test]
    fn same_dir_tree_selects_rename() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in");
        fs::create_dir(&src).unwrap();
        let o = op(&src, &dir.path().join("out"), "a.jpg");
        assert_eq!(
            select_strategy(TransferMode::Move, Some(&o)),
            Strategy::SameVolumeRename
        );
    }

    #[test]
    fn execute_rename_moves_files_and_reports() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in");
        let out = dir.path().join("out");
        fs::create_dir(&src).unwrap();
        let mut ops = Vec::new();
        for i in 0..5 {
            let name = format!("IMG_{i}.jpg");
            fs::write(src.join(&name), b"x").unwrap();
            ops.push(op(&src, &out, &name));
        }
        // one missing source becomes a per-file error
        ops.push(op(&src, &out, "ghost.jpg"));

        let cancel = CancelToken::new();
        let opts = EngineOptions { chunk_size: 2, ..EngineOptions::default() };
        let ctx = RunContext::new(opts, &cancel);
        let report = execute(&ops, Strategy::SameVolumeRename, &ctx).unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(report.error_count, 1);
        assert!(!report.success());
        assert!(out.join("batch_001/IMG_3.jpg").exists());
        assert!(!src.join("IMG_3.jpg").exists());
    }

    #[test]
    fn copy_mode_keeps_sources() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in");
        let out = dir.path().join("out");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.jpg"), b"abc").unwrap();
        let ops = vec![op(&src, &out, "a.jpg")];
        let cancel = CancelToken::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let ctx = RunContext::new(EngineOptions::default(), &cancel).with_progress(Some(&tx));
        let report = execute(&ops, Strategy::Copy, &ctx).unwrap();
        drop(tx);
        assert!(report.success());
        assert_eq!(fs::read(out.join("batch_001/a.jpg")).unwrap(), b"abc");
        assert!(src.join("a.jpg").exists());
        let events: Vec<_> = rx.iter().collect();
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Finished { processed: 1, cancelled: false, .. })
        ));
    }

    #[test]
    fn cancelled_before_start_touches_nothing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.jpg"), b"abc").unwrap();
        let ops = vec![op(&src, &dir.path().join("out"), "a.jpg")];
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = RunContext::new(EngineOptions::default(), &cancel);
        for strategy in [Strategy::SameVolumeRename, Strategy::CrossVolumeMove] {
            let report = execute(&ops, strategy, &ctx).unwrap();
            assert!(report.cancelled);
            assert_eq!(report.processed, 0);
        }
        assert!(src.join("a.jpg").exists());
    }

    #[test]
    fn cross_volume_move_deletes_sources_and_records_progress() {
        use crate::ledger::{BatchInfo, PlanSpec};
        use crate::planner::SortPolicy;
        use crate::seal::StateStore;

        let dir = tempdir().unwrap();
        let src = dir.path().join("in");
        let out = dir.path().join("out");
        fs::create_dir(&src).unwrap();
        let mut ops = Vec::new();
        for i in 0..6 {
            let name = format!("DSC_{i:04}.nef");
            fs::write(src.join(&name), format!("raw {i}")).unwrap();
            ops.push(op(&src, &out, &name));
        }
        // partial copy left behind by a worker that died mid-transfer
        fs::create_dir_all(out.join("batch_001")).unwrap();
        let stale = platform::tmp_sibling_name(&ops[2].dest_path);
        fs::write(&stale, b"ra").unwrap();

        let store = StateStore::open(&dir.path().join("state"), false).unwrap();
        let ledger = ProgressLedger::new(store.clone());
        ledger
            .start(PlanSpec {
                folder_path: src.clone(),
                output_dir: out.clone(),
                mode: TransferMode::Move,
                strategy: Strategy::CrossVolumeMove,
                operations: ops.clone(),
                batch_info: vec![BatchInfo { folder_name: "batch_001".into(), file_count: 6 }],
                prefix: "batch".into(),
                sort_by: SortPolicy::NameAsc,
                max_files_per_batch: 10,
            })
            .unwrap();

        let cancel = CancelToken::new();
        let opts = EngineOptions { concurrency: 3, ..EngineOptions::default() };
        let ctx = RunContext::new(opts, &cancel).with_ledger(&ledger);
        let report = execute(&ops, Strategy::CrossVolumeMove, &ctx).unwrap();

        assert!(report.success(), "{:?}", report.errors);
        assert_eq!(report.strategy, Strategy::CrossVolumeMove);
        assert_eq!(report.processed, 6);
        for (i, o) in ops.iter().enumerate() {
            assert!(!o.source_path.exists(), "{} still in source", o.file_name);
            assert_eq!(fs::read_to_string(&o.dest_path).unwrap(), format!("raw {i}"));
        }
        assert!(!stale.exists());
        assert_eq!(fs::read_dir(out.join("batch_001")).unwrap().count(), 6);

        let on_disk = ProgressLedger::new(store).load().unwrap().unwrap();
        assert!(on_disk.remaining_operations().is_empty());
    }
}
