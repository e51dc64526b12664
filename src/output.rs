use owo_colors::OwoColorize;

use crate::engine::{ExecutionReport, FileError, Progress};
use crate::history::{HistorySummary, UndoReport, ValidationReport};
use crate::ledger::InterruptedSummary;
use crate::planner::BatchPreview;
use crate::session::{BatchOutcome, ScanSummary};

/// Small wrapper around stdout/stderr printing to provide consistent, colored
/// user-facing messages. Colors are enabled only when output is a TTY.
fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub fn print_info(msg: &str) {
    if is_tty() {
        println!("{} {}", "info:".cyan().bold(), msg);
    } else {
        println!("info: {}", msg);
    }
}

pub fn print_warn(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    } else {
        eprintln!("warn: {}", msg);
    }
}

pub fn print_error(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {}", msg);
    }
}

pub fn print_success(msg: &str) {
    if is_tty() {
        println!("{} {}", "ok:".green().bold(), msg);
    } else {
        println!("ok: {}", msg);
    }
}

/// Print a plain user-facing line (no prefix). Use this for primary outputs
/// which users may script against.
pub fn print_user(msg: &str) {
    println!("{}", msg);
}

/// Print any serializable result as pretty JSON (for `--json`).
pub fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => print_error(&format!("could not serialize output: {e}")),
    }
}

/// Single-line progress, overwritten in place on a TTY.
pub fn print_progress(p: &Progress) {
    let pct = if p.total_files == 0 {
        100
    } else {
        p.processed_files * 100 / p.total_files
    };
    if is_tty() {
        eprint!("\r{} {}/{} files ({pct}%)   ", "progress:".cyan(), p.processed_files, p.total_files);
    }
}

pub fn end_progress() {
    if is_tty() {
        eprintln!();
    }
}

pub fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{v:.1} {}", UNITS[unit])
    }
}

pub fn print_scan(s: &ScanSummary) {
    if s.cancelled {
        print_warn(&format!("scan of {} cancelled", s.folder.display()));
        return;
    }
    print_user(&format!("Folder:      {}", s.folder.display()));
    print_user(&format!("Files:       {}", s.total_files));
    print_user(&format!("Media files: {} in {} groups", s.media_files, s.groups));
    print_user(&format!("Skipped:     {}", s.skipped_files));
    print_user(&format!("Total size:  {}", human_bytes(s.total_bytes)));
}

pub fn print_preview(p: &BatchPreview) {
    if p.cancelled {
        print_warn("preview cancelled");
        return;
    }
    print_user(&format!(
        "{} files in {} batches ({} skipped)",
        p.total_files, p.batch_count, p.skipped_files
    ));
    for d in &p.details {
        let flag = if d.flagged { " [flagged]" } else { "" };
        print_user(&format!(
            "  {:<24} {:>6} files  {:>6} groups{flag}",
            d.folder_name,
            d.file_count,
            d.group_names.len()
        ));
    }
    if !p.oversized_groups.is_empty() {
        print_warn(&format!(
            "{} groups exceed the batch size and get their own folder: {}",
            p.oversized_groups.len(),
            p.oversized_groups.join(", ")
        ));
    }
}

fn print_file_errors(errors: &[FileError], total: usize) {
    for e in errors {
        print_error(&format!("{}: {}", e.file_name, e.message));
    }
    if total > errors.len() {
        print_error(&format!("... and {} more errors", total - errors.len()));
    }
}

pub fn print_report(r: &ExecutionReport) {
    print_file_errors(&r.errors, r.error_count);
    let line = format!(
        "{}/{} files processed ({}), {} errors",
        r.processed, r.total, r.strategy, r.error_count
    );
    if r.cancelled {
        print_warn(&format!("cancelled: {line}"));
    } else if r.success() {
        print_success(&line);
    } else {
        print_warn(&line);
    }
}

pub fn print_outcome(o: &BatchOutcome) {
    print_report(&o.report);
    match &o.operation_id {
        Some(id) => print_info(&format!("operation {id} ({}, {} batches)", o.mode, o.batch_count)),
        None => print_info("cancelled while planning; no file was touched"),
    }
    if o.resumable {
        print_info("progress saved; run `batch_split resume` to continue or `batch_split discard` to drop it");
    }
    if let Some(undo) = &o.undo {
        print_info(&format!(
            "undo available: batch_split undo {} ({} files)",
            undo.operation_id, undo.file_count
        ));
    }
}

pub fn print_interrupted(s: &InterruptedSummary) {
    print_warn(&format!(
        "interrupted {} operation {} from {}",
        s.mode,
        s.operation_id,
        s.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    print_user(&format!("  folder:    {}", s.folder_path.display()));
    print_user(&format!("  output:    {}", s.output_dir.display()));
    print_user(&format!(
        "  progress:  {}/{} files ({} remaining) in {} batches",
        s.processed_files, s.total_files, s.remaining_files, s.batch_count
    ));
    print_user(&format!(
        "  plan:      {} per batch, {}, prefix {:?}",
        s.max_files_per_batch, s.sort_by, s.prefix
    ));
}

pub fn print_history(entries: &[HistorySummary]) {
    if entries.is_empty() {
        print_info("no undoable operations");
        return;
    }
    for e in entries {
        print_user(&format!(
            "{}  {}  {:>6} files  {:>4} batches  {} -> {}",
            e.operation_id,
            e.created_at.format("%Y-%m-%d %H:%M:%S"),
            e.file_count,
            e.batch_count,
            e.source_folder.display(),
            e.output_dir.display()
        ));
    }
}

pub fn print_undo(r: &UndoReport) {
    print_file_errors(&r.errors, r.error_count);
    for f in &r.retained_folders {
        print_warn(&format!("kept non-empty folder {}", f.display()));
    }
    let line = format!(
        "{}/{} files restored, {} folders removed",
        r.restored,
        r.total,
        r.removed_folders.len()
    );
    if r.success() {
        print_success(&line);
    } else {
        print_warn(&format!("{line}; remaining entries kept for another undo"));
    }
}

pub fn print_validation(v: &ValidationReport) {
    let line = format!("{}/{} sampled files found", v.found, v.checked);
    if v.valid {
        print_success(&line);
    } else {
        print_warn(&line);
        for m in &v.missing {
            print_user(&format!("  missing: {}", m.display()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
