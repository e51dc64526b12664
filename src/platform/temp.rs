//! Shared temporary name helpers for platform modules.
//! Temp files are hidden siblings of their target so the final rename stays
//! on one filesystem, and so leftovers can be recognised and removed.
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn tmp_prefix(target: &Path) -> String {
    let name = target
        .file_name()
        .unwrap_or_else(|| OsStr::new("state"))
        .to_string_lossy();
    format!(".{name}.tmp.")
}

/// Unique hidden sibling temp name for an atomic write of `target`.
/// Pattern: .<file_name>.tmp.<pid>.<nanos>.<seq>
pub fn tmp_sibling_name(target: &Path) -> PathBuf {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}{pid}.{nanos}.{seq}", tmp_prefix(target));
    target.parent().unwrap_or_else(|| Path::new(".")).join(name)
}

/// True if `candidate` looks like a temp sibling produced for `target`.
pub fn is_tmp_sibling_of(target: &Path, candidate: &Path) -> bool {
    if candidate.parent() != target.parent() {
        return false;
    }
    candidate
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(&tmp_prefix(target)))
}

/// Delete leftover temp siblings of `target` (from an interrupted write).
/// Returns how many were removed.
pub fn remove_tmp_siblings(target: &Path) -> usize {
    let Some(parent) = target.parent() else {
        return 0;
    };
    let Ok(entries) = fs::read_dir(parent) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let candidate = entry.path();
        if is_tmp_sibling_of(target, &candidate) {
            match fs::remove_file(&candidate) {
                Ok(()) => {
                    debug!(path = %candidate.display(), "removed leftover temp file");
                    removed += 1;
                }
                Err(e) => debug!(path = %candidate.display(), error = %e, "could not remove leftover temp file"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn uniqueness_concurrent() {
        let target = Path::new("dir/batch_progress.json");
        let mut handles = Vec::new();
        for _ in 0..32 {
            let t = target.to_path_buf();
            handles.push(thread::spawn(move || tmp_sibling_name(&t)));
        }
        let mut set = HashSet::new();
        for h in handles {
            let p = h.join().unwrap();
            assert!(is_tmp_sibling_of(target, &p));
            assert!(set.insert(p));
        }
        assert_eq!(set.len(), 32);
    }

    #[test]
    fn other_files_are_not_siblings() {
        let target = Path::new("dir/history.json");
        assert!(!is_tmp_sibling_of(target, Path::new("dir/history.json")));
        assert!(!is_tmp_sibling_of(target, Path::new("dir/.batch_progress.json.tmp.1.2.3")));
        assert!(!is_tmp_sibling_of(target, Path::new("other/.history.json.tmp.1.2.3")));
    }

    #[test]
    fn sweep_removes_only_matching_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("IMG_0001.jpg");
        fs::write(tmp_sibling_name(&target), b"partial").unwrap();
        fs::write(tmp_sibling_name(&target), b"partial").unwrap();
        let other = tmp_sibling_name(&dir.path().join("IMG_0002.jpg"));
        fs::write(&other, b"in use").unwrap();

        assert_eq!(remove_tmp_siblings(&target), 2);
        assert!(other.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
