//! Control-thread bookkeeping shared by both execution paths.
//! Only the tracker mutates the ledger's processed set during a run.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, warn};

use super::{
    ERROR_SAMPLE, ExecutionReport, FileError, Operation, PROGRESS_INTERVAL, Progress,
    ProgressEvent, RunContext, Strategy, util,
};
use crate::errors::TransferError;

pub(super) struct Tracker<'c, 'a> {
    ctx: &'c RunContext<'a>,
    total: usize,
    attempted: usize,
    processed: usize,
    base_processed: usize,
    total_files: usize,
    completed: Vec<Operation>,
    errors: Vec<FileError>,
    error_count: usize,
    dirty_dirs: BTreeSet<PathBuf>,
    last_flush: Instant,
    last_progress: Instant,
}

impl<'c, 'a> Tracker<'c, 'a> {
    pub(super) fn new(ctx: &'c RunContext<'a>, total: usize) -> Self {
        let (base_processed, total_files) = ctx
            .ledger
            .map(|l| (l.processed_count(), l.total_files()))
            .unwrap_or((0, total));
        let now = Instant::now();
        Self {
            ctx,
            total,
            attempted: 0,
            processed: 0,
            base_processed,
            total_files,
            completed: Vec::new(),
            errors: Vec::new(),
            error_count: 0,
            dirty_dirs: BTreeSet::new(),
            last_flush: now,
            last_progress: now,
        }
    }

    /// Record one finished operation.
    pub(super) fn complete(&mut self, op: &Operation, result: Result<(), TransferError>) {
        self.attempted += 1;
        match result {
            Ok(()) => {
                self.processed += 1;
                if let Some(ledger) = self.ctx.ledger {
                    ledger.record_processed([op.file_name.clone()]);
                }
                self.completed.push(op.clone());
            }
            Err(e) => {
                warn!(file = %op.file_name, error = %e, "file operation failed");
                self.error_count += 1;
                if self.errors.len() < ERROR_SAMPLE {
                    self.errors.push(FileError {
                        file_name: op.file_name.clone(),
                        path: op.source_path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Directories touched by renames; synced before the ledger claims them.
    pub(super) fn mark_dirty(&mut self, op: &Operation) {
        for p in [&op.source_path, &op.dest_path] {
            if let Some(parent) = p.parent() {
                self.dirty_dirs.insert(parent.to_path_buf());
            }
        }
    }

    /// Emit progress and flush on their own cadences.
    pub(super) fn tick(&mut self) {
        if self.last_progress.elapsed() >= PROGRESS_INTERVAL {
            self.emit_progress();
        }
        if self.last_flush.elapsed() >= self.ctx.options.flush_interval {
            self.flush();
        }
    }

    pub(super) fn emit_progress(&mut self) {
        self.last_progress = Instant::now();
        if let Some(tx) = self.ctx.progress {
            let _ = tx.send(ProgressEvent::Progress(Progress {
                current: self.attempted,
                total: self.total,
                processed_files: self.base_processed + self.processed,
                total_files: self.total_files,
            }));
        }
    }

    pub(super) fn flush_if_due(&mut self) {
        if self.last_flush.elapsed() >= self.ctx.options.flush_interval {
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.last_flush = Instant::now();
        let Some(ledger) = self.ctx.ledger else {
            return;
        };
        for dir in std::mem::take(&mut self.dirty_dirs) {
            if let Err(e) = util::fsync_dir(&dir) {
                debug!(dir = %dir.display(), error = %e, "directory fsync failed");
            }
        }
        match ledger.flush() {
            Ok(outcome) => debug!(?outcome, "progress ledger flushed"),
            Err(e) => warn!(error = %e, "progress ledger flush failed"),
        }
    }

    pub(super) fn finish(mut self) -> ExecutionReport {
        let cancelled = self.ctx.cancel.is_cancelled() && self.attempted < self.total;
        self.emit_progress();
        self.flush();
        if let Some(tx) = self.ctx.progress {
            let _ = tx.send(ProgressEvent::Finished {
                processed: self.processed,
                total: self.total,
                cancelled,
            });
        }
        ExecutionReport {
            processed: self.processed,
            total: self.total,
            errors: self.errors,
            error_count: self.error_count,
            cancelled,
            // overwritten by `execute`
            strategy: Strategy::SameVolumeRename,
            completed: self.completed,
        }
    }
}
