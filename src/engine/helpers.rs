//! I/O helper utilities.
//!
//! Enrich io::Error with the operation, the path and a platform-aware hint,
//! for both anyhow code paths and per-file transfer errors.
//!
//! Usage:
//!   // in functions returning anyhow::Result<_>
//!   fs::create_dir_all(dir).map_err(io_error_with_help("create dir", dir))?;
//!
//!   // per-file engine errors
//!   fs::rename(a, b).map_err(transfer_error("rename", a))?;

use anyhow::anyhow;
use std::io;
use std::path::Path;

use crate::errors::TransferError;

fn hint_for_code(code: i32) -> Option<&'static str> {
    #[cfg(unix)]
    {
        match code {
            libc::EACCES | libc::EPERM => Some("permission denied; check ownership and write permissions"),
            libc::EXDEV => Some("cross-filesystem; atomic rename not possible"),
            libc::EBUSY => Some("resource busy; ensure no other process is writing"),
            libc::ENOENT => Some("path not found; verify it exists"),
            libc::EEXIST => Some("already exists; the target is never overwritten"),
            libc::ENOSPC => Some("insufficient space on device"),
            libc::EROFS => Some("read-only filesystem; cannot write here"),
            libc::ENAMETOOLONG => Some("filename or path too long"),
            libc::EMFILE | libc::ENFILE => Some("too many open files; lower concurrency or raise limits"),
            _ => None,
        }
    }
    #[cfg(windows)]
    {
        match code {
            5 => Some("access denied; check permissions"),
            17 => Some("not same device; cross-filesystem move"),
            32 => Some("sharing violation; file is in use"),
            2 | 3 => Some("path not found; verify it exists"),
            80 | 183 => Some("already exists; the target is never overwritten"),
            112 => Some("insufficient disk space"),
            206 => Some("filename or path too long"),
            _ => None,
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = code;
        None
    }
}

/// Format a human-friendly message with op/path plus platform-aware hints.
pub fn build_message(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{} '{}': {}", op, path.display(), e);
    let hint = match e.raw_os_error() {
        Some(code) => hint_for_code(code),
        None => match e.kind() {
            io::ErrorKind::PermissionDenied => Some("permission denied; check ownership and write permissions"),
            io::ErrorKind::NotFound => Some("path not found; verify it exists"),
            io::ErrorKind::AlreadyExists => Some("already exists; the target is never overwritten"),
            _ => None,
        },
    };
    if let Some(h) = hint {
        msg.push_str(" (");
        msg.push_str(h);
        msg.push(')');
    }
    if let Some(code) = e.raw_os_error() {
        msg.push_str(&format!(" [os code: {code}]"));
    }
    msg
}

/// Adapter for anyhow::Result code.
pub fn io_error_with_help<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> anyhow::Error + 'a {
    move |e: io::Error| anyhow!(build_message(op, path, &e))
}

/// Adapter for per-file engine code.
pub fn transfer_error<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> TransferError + 'a {
    move |e: io::Error| TransferError::Io(build_message(op, path, &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_op_path_and_hint() {
        let e = io::Error::new(io::ErrorKind::NotFound, "gone");
        let msg = build_message("open source", Path::new("/x/a.jpg"), &e);
        assert!(msg.contains("open source '/x/a.jpg'"));
        assert!(msg.contains("verify it exists"));
    }

    #[cfg(unix)]
    #[test]
    fn raw_code_is_reported() {
        let e = io::Error::from_raw_os_error(libc::ENOSPC);
        let err = transfer_error("copy", Path::new("/y"))(e);
        let s = err.to_string();
        assert!(s.contains("insufficient space"));
        assert!(s.contains("[os code:"));
    }
}
