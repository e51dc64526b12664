//! Progress ledger: the durable record of an in-flight batch operation.
//!
//! - `start` writes the whole plan (nothing processed) before any file moves.
//! - `record_processed` only touches memory.
//! - `flush` writes the full record atomically; concurrent requests coalesce
//!   so at most one write is in flight and exactly one follow-up runs after it.
//! - `load` reads the record back after a crash; a record that fails
//!   verification is deleted and treated as absent.

mod record;

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use crate::seal::StateStore;

pub use record::{BatchInfo, InterruptedSummary, PlanSpec, ProgressRecord};

/// Ledger file name under the state directory.
pub const LEDGER_FILE: &str = "batch_progress.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The record was written (including any coalesced follow-up)
    Written,
    /// Another flush was in flight; it will write once more on our behalf
    Coalesced,
    /// Nothing to write
    Skipped,
}

#[derive(Debug, Default)]
struct FlushGate {
    in_flight: bool,
    pending: bool,
}

#[derive(Debug)]
pub struct ProgressLedger {
    store: StateStore,
    record: Mutex<Option<ProgressRecord>>,
    gate: Mutex<FlushGate>,
    // serializes disk writes against `clear`
    io: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgressLedger {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            record: Mutex::new(None),
            gate: Mutex::new(FlushGate::default()),
            io: Mutex::new(()),
        }
    }

    /// Durably record a new plan and make it current. Returns the operation id.
    pub fn start(&self, plan: PlanSpec) -> Result<String> {
        let operation_id = uuid::Uuid::new_v4().to_string();
        let record = ProgressRecord::from_plan(operation_id.clone(), plan);
        {
            let _io = lock(&self.io);
            self.store.write(LEDGER_FILE, &record)?;
        }
        info!(
            operation_id = %operation_id,
            total_files = record.total_files,
            batches = record.batch_info.len(),
            "progress ledger started"
        );
        *lock(&self.record) = Some(record);
        Ok(operation_id)
    }

    /// Append completed file names in memory. No I/O.
    pub fn record_processed<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        if let Some(r) = lock(&self.record).as_mut() {
            r.processed_file_names.extend(names);
        }
    }

    /// Write the current record, coalescing with a flush already in flight.
    pub fn flush(&self) -> Result<FlushOutcome> {
        {
            let mut gate = lock(&self.gate);
            if gate.in_flight {
                gate.pending = true;
                return Ok(FlushOutcome::Coalesced);
            }
            gate.in_flight = true;
        }

        let mut outcome = FlushOutcome::Skipped;
        loop {
            let result = self.write_current();
            let mut gate = lock(&self.gate);
            match result {
                Ok(wrote) => {
                    if wrote {
                        outcome = FlushOutcome::Written;
                    }
                    if gate.pending {
                        gate.pending = false;
                        continue;
                    }
                    gate.in_flight = false;
                    return Ok(outcome);
                }
                Err(e) => {
                    gate.in_flight = false;
                    gate.pending = false;
                    return Err(e);
                }
            }
        }
    }

    fn write_current(&self) -> Result<bool> {
        let _io = lock(&self.io);
        let snapshot = {
            let mut guard = lock(&self.record);
            match guard.as_mut() {
                Some(r) => {
                    r.last_updated = Utc::now();
                    r.clone()
                }
                None => return Ok(false),
            }
        };
        self.store.write(LEDGER_FILE, &snapshot)?;
        debug!(
            operation_id = %snapshot.operation_id,
            processed = snapshot.processed_file_names.len(),
            "progress ledger written"
        );
        Ok(true)
    }

    /// Read the durable record and make it current.
    ///
    /// Unreadable or tampered records are deleted and yield `None`; a record
    /// that verifies but contradicts itself is an error.
    pub fn load(&self) -> Result<Option<ProgressRecord>> {
        let loaded: Option<ProgressRecord> = self.store.read(LEDGER_FILE)?;
        if let Some(r) = &loaded {
            r.validate()?;
        }
        *lock(&self.record) = loaded.clone();
        Ok(loaded)
    }

    /// Forget the current record and delete it (and any temp artifact) from disk.
    pub fn clear(&self) -> Result<()> {
        let _io = lock(&self.io);
        let id = lock(&self.record).take().map(|r| r.operation_id);
        let existed = self.store.remove(LEDGER_FILE)?;
        debug!(operation_id = ?id, existed, "progress ledger cleared");
        Ok(())
    }

    pub fn snapshot(&self) -> Option<ProgressRecord> {
        lock(&self.record).clone()
    }

    pub fn processed_count(&self) -> usize {
        lock(&self.record)
            .as_ref()
            .map_or(0, |r| r.processed_file_names.len())
    }

    pub fn total_files(&self) -> usize {
        lock(&self.record).as_ref().map_or(0, |r| r.total_files)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.record).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Operation, Strategy, TransferMode};
    use crate::planner::SortPolicy;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn plan(n: usize) -> PlanSpec {
        let operations = (0..n)
            .map(|i| Operation {
                file_name: format!("IMG_{i:04}.jpg"),
                source_path: PathBuf::from(format!("/src/IMG_{i:04}.jpg")),
                dest_path: PathBuf::from(format!("/out/batch_001/IMG_{i:04}.jpg")),
                batch_index: 0,
            })
            .collect();
        PlanSpec {
            folder_path: "/src".into(),
            output_dir: "/out".into(),
            mode: TransferMode::Move,
            strategy: Strategy::SameVolumeRename,
            operations,
            batch_info: vec![BatchInfo { folder_name: "batch_001".into(), file_count: n }],
            prefix: "batch".into(),
            sort_by: SortPolicy::NameAsc,
            max_files_per_batch: 500,
        }
    }

    #[test]
    fn start_is_durable_before_any_flush() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), true).unwrap();
        let ledger = ProgressLedger::new(store.clone());
        let id = ledger.start(plan(3)).unwrap();

        let reopened = ProgressLedger::new(store);
        let r = reopened.load().unwrap().unwrap();
        assert_eq!(r.operation_id, id);
        assert_eq!(r.total_files, 3);
        assert!(r.processed_file_names.is_empty());
    }

    #[test]
    fn record_is_memory_only_until_flush() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), false).unwrap();
        let ledger = ProgressLedger::new(store.clone());
        ledger.start(plan(3)).unwrap();
        ledger.record_processed(["IMG_0000.jpg".to_string()]);
        assert_eq!(ledger.processed_count(), 1);

        let on_disk = ProgressLedger::new(store.clone()).load().unwrap().unwrap();
        assert!(on_disk.processed_file_names.is_empty());

        assert_eq!(ledger.flush().unwrap(), FlushOutcome::Written);
        let on_disk = ProgressLedger::new(store).load().unwrap().unwrap();
        assert_eq!(on_disk.remaining_operations().len(), 2);
    }

    #[test]
    fn concurrent_flushes_coalesce_and_end_consistent() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), true).unwrap();
        let ledger = Arc::new(ProgressLedger::new(store.clone()));
        ledger.start(plan(64)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for i in (t..64).step_by(8) {
                        ledger.record_processed([format!("IMG_{i:04}.jpg")]);
                        ledger.flush().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        ledger.flush().unwrap();
        let r = ProgressLedger::new(store).load().unwrap().unwrap();
        assert_eq!(r.processed_file_names.len(), 64);
    }

    #[test]
    fn clear_removes_record() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), true).unwrap();
        let ledger = ProgressLedger::new(store.clone());
        ledger.start(plan(1)).unwrap();
        ledger.clear().unwrap();
        assert!(!ledger.is_active());
        assert!(!store.path(LEDGER_FILE).exists());
        assert_eq!(ledger.flush().unwrap(), FlushOutcome::Skipped);
        assert!(!store.path(LEDGER_FILE).exists());
    }

    #[test]
    fn interrupted_write_leaves_previous_record_readable() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), true).unwrap();
        let ledger = ProgressLedger::new(store.clone());
        let id = ledger.start(plan(4)).unwrap();
        ledger.record_processed(["IMG_0000.jpg".to_string()]);
        ledger.flush().unwrap();

        // A later flush died after writing half of its temp file.
        ledger.record_processed(["IMG_0001.jpg".to_string()]);
        let full = std::fs::read(store.path(LEDGER_FILE)).unwrap();
        let tmp = crate::platform::tmp_sibling_name(&store.path(LEDGER_FILE));
        std::fs::write(&tmp, &full[..full.len() / 2]).unwrap();

        let reopened = ProgressLedger::new(store.clone());
        let r = reopened.load().unwrap().expect("earlier record survives");
        assert_eq!(r.operation_id, id);
        assert_eq!(r.processed_file_names.len(), 1);
        assert!(r.processed_file_names.contains("IMG_0000.jpg"));

        reopened.clear().unwrap();
        assert!(!tmp.exists(), "leftover temp is removed with the record");
        assert!(!store.path(LEDGER_FILE).exists());
    }
}
