//! Advisory lock on the state directory.
//! Only one process may run batch operations against an installation at a time.
//!
//! Design:
//! - We lock by opening/holding `.batch_split.lock` inside the state directory.
//! - Unix: flock(LOCK_EX | LOCK_NB) on the file descriptor.
//! - Windows: open the file without sharing (exclusive).
//!
//! The lock is released when the guard is dropped.

use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

#[cfg(unix)]
use std::fs::{File, OpenOptions};
#[cfg(unix)]
use std::os::fd::AsRawFd;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[cfg(windows)]
use windows_sys::Win32::{
    Foundation::{CloseHandle, INVALID_HANDLE_VALUE},
    Storage::FileSystem::{CreateFileW, FILE_ATTRIBUTE_HIDDEN, OPEN_ALWAYS},
};

#[cfg(windows)]
const GENERIC_READ: u32 = 0x8000_0000;
#[cfg(windows)]
const GENERIC_WRITE: u32 = 0x4000_0000;

pub const LOCK_FILE: &str = ".batch_split.lock";

/// RAII guard held while the state directory lock is active.
#[derive(Debug)]
pub struct StateLock {
    #[cfg(unix)]
    file: File,
    #[cfg(windows)]
    handle: isize,
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            // SAFETY: the descriptor is owned by `self.file` and still open.
            let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
        #[cfg(windows)]
        {
            // SAFETY: the handle came from CreateFileW and is closed once.
            let _ = unsafe { CloseHandle(self.handle as _) };
        }
        trace!(path = %self.path.display(), "state lock released");
    }
}

/// Try to lock `dir` without blocking.
/// Returns Ok(None) if another process holds the lock.
pub fn try_acquire_state_lock(dir: &Path) -> io::Result<Option<StateLock>> {
    let lock_path = dir.join(LOCK_FILE);

    #[cfg(unix)]
    {
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .custom_flags(libc::O_CLOEXEC)
            .mode(0o600)
            .open(&lock_path)?;

        // SAFETY: flock on a valid, owned descriptor.
        let rc = unsafe { libc::flock(f.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            trace!(path = %lock_path.display(), "state lock acquired");
            return Ok(Some(StateLock { file: f, path: lock_path }));
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            trace!(path = %lock_path.display(), "state lock held elsewhere");
            return Ok(None);
        }
        Err(err)
    }

    #[cfg(windows)]
    {
        use std::iter::once;
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = lock_path.as_os_str().encode_wide().chain(once(0)).collect();
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                std::ptr::null(),
                OPEN_ALWAYS,
                FILE_ATTRIBUTE_HIDDEN,
                std::ptr::null_mut(),
            )
        };
        if handle != INVALID_HANDLE_VALUE {
            trace!(path = %lock_path.display(), "state lock acquired");
            return Ok(Some(StateLock { handle: handle as isize, path: lock_path }));
        }
        let err = io::Error::last_os_error();
        // ERROR_SHARING_VIOLATION => already locked
        if err.raw_os_error() == Some(32) {
            trace!(path = %lock_path.display(), "state lock held elsewhere");
            return Ok(None);
        }
        Err(err)
    }
}
