//! Worker pool for copy-based transfers.
//!
//! Workers claim operation indices from a shared atomic cursor, do the I/O
//! and send a completion message. The control thread owns all bookkeeping:
//! it records completions and, on a timer tick, emits progress and flushes
//! the ledger.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use tracing::trace;

use super::tracker::Tracker;
use super::{ExecutionReport, Operation, PROGRESS_INTERVAL, RunContext, copy};
use crate::config::MAX_CONCURRENCY;
use crate::errors::TransferError;

pub(super) fn run(ops: &[Operation], delete_source: bool, ctx: &RunContext<'_>) -> ExecutionReport {
    let mut tracker = Tracker::new(ctx, ops.len());
    let workers = ctx.options.concurrency.clamp(1, MAX_CONCURRENCY).min(ops.len());
    if workers == 0 {
        return tracker.finish();
    }

    let cursor = AtomicUsize::new(0);
    let cancel = ctx.cancel;
    let preserve_mtime = ctx.options.preserve_mtime;
    let (tx, rx) = mpsc::channel::<(usize, Result<(), TransferError>)>();

    thread::scope(|s| {
        for worker in 0..workers {
            let tx = tx.clone();
            let cursor = &cursor;
            s.spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        trace!(worker, "worker stopping on cancel");
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(op) = ops.get(idx) else {
                        break;
                    };
                    let res = copy::transfer_verified(
                        &op.source_path,
                        &op.dest_path,
                        delete_source,
                        preserve_mtime,
                    );
                    if tx.send((idx, res)).is_err() {
                        break;
                    }
                }
            });
        }
        // Workers hold the only senders; the loop ends when they all exit.
        drop(tx);

        loop {
            match rx.recv_timeout(PROGRESS_INTERVAL) {
                Ok((idx, res)) => tracker.complete(&ops[idx], res),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            tracker.tick();
        }
    });

    tracker.finish()
}
