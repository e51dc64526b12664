//! Windows implementations of platform helpers (best-effort, minimal ACL awareness).
//!
//! Notes:
//! - Windows lacks POSIX mode semantics; we do not attempt ACL management here.
//! - `fs::rename` replaces an existing target on Windows (MoveFileExW with
//!   MOVEFILE_REPLACE_EXISTING), so temp + rename is still atomic per file.

use anyhow::{Context, Result, bail};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path};

use super::temp::tmp_sibling_name;

/// Open log file for appending (no symlink defense available via std on Windows).
pub fn open_log_file_secure_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Write `contents` to a unique sibling temp file, flush it, then rename over `path`.
pub fn atomic_write_0600(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target path has no parent"))?;
    fs::create_dir_all(parent).with_context(|| format!("create parent '{}'", parent.display()))?;

    let tmp = tmp_sibling_name(path);
    let write_tmp = || -> Result<()> {
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .with_context(|| format!("create temp '{}'", tmp.display()))?;
        f.write_all(contents).context("write temp")?;
        f.sync_all().context("flush temp")?;
        Ok(())
    };
    if let Err(e) = write_tmp() {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e)
            .with_context(|| format!("rename '{}' -> '{}'", tmp.display(), path.display()));
    }
    Ok(())
}

/// No-op on Windows; POSIX-style directory modes are not applicable.
pub fn set_dir_mode_0700(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Not measured on Windows; callers treat the space as unlimited.
pub fn available_space(_path: &Path) -> io::Result<u64> {
    Ok(u64::MAX)
}

/// Minimal security check: path must be an existing, non-readonly directory.
pub fn ensure_secure_directory(path: &Path, label: &str) -> Result<()> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        bail!("{} '{}' is not a directory", label, path.display());
    }
    if meta.permissions().readonly() {
        bail!("{} '{}' has READONLY permissions; cannot write", label, path.display());
    }
    Ok(())
}

/// Compare drive / UNC share prefixes of the canonical paths.
pub fn same_volume(a: &Path, b: &Path) -> io::Result<bool> {
    let a = dunce::canonicalize(a)?;
    let b = dunce::canonicalize(b)?;
    let prefix = |p: &Path| match p.components().next() {
        Some(Component::Prefix(pre)) => Some(pre.as_os_str().to_ascii_lowercase()),
        _ => None,
    };
    Ok(prefix(&a) == prefix(&b))
}
