//! Same-volume path: atomic renames in fixed-size chunks on the control thread.
//! Between chunks the cancel token is polled, progress is emitted and the
//! ledger is flushed when due.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use super::helpers::transfer_error;
use super::tracker::Tracker;
use super::{ExecutionReport, Operation, RunContext, copy, util};
use crate::errors::TransferError;

pub(super) fn run(ops: &[Operation], ctx: &RunContext<'_>) -> ExecutionReport {
    let mut tracker = Tracker::new(ctx, ops.len());
    let mut created: HashSet<PathBuf> = HashSet::new();

    for chunk in ops.chunks(ctx.options.chunk_size.max(1)) {
        if ctx.cancel.is_cancelled() {
            debug!("cancellation observed between chunks");
            break;
        }
        for op in chunk {
            let res = rename_one(op, &mut created, ctx.options.preserve_mtime);
            tracker.mark_dirty(op);
            tracker.complete(op, res);
        }
        tracker.emit_progress();
        tracker.flush_if_due();
    }
    tracker.finish()
}

fn rename_one(
    op: &Operation,
    created: &mut HashSet<PathBuf>,
    preserve_mtime: bool,
) -> Result<(), TransferError> {
    let src = &op.source_path;
    let dest = &op.dest_path;

    if !util::exists_no_follow(src) {
        if util::exists_no_follow(dest) {
            return Ok(());
        }
        return Err(TransferError::SourceMissing(src.clone()));
    }
    if util::exists_no_follow(dest) {
        return Err(TransferError::DestinationExists(dest.clone()));
    }

    if let Some(dir) = dest.parent()
        && !created.contains(dir)
    {
        fs::create_dir_all(dir).map_err(transfer_error("create batch folder", dir))?;
        created.insert(dir.to_path_buf());
    }

    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if util::is_cross_device(&e) => {
            debug!(src = %src.display(), "rename crossed devices; copying instead");
            copy::transfer_verified(src, dest, true, preserve_mtime)
        }
        Err(e) => Err(transfer_error("rename", src)(e)),
    }
}
