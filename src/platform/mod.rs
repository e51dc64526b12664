//! Platform-specific helpers.
//! This module hides OS differences (Unix/Windows) behind a uniform API so
//! the rest of the codebase can remain platform-agnostic.

#[cfg(unix)]
mod common_unix;
pub mod temp;
#[cfg(unix)]
mod unix;
#[cfg(not(unix))]
mod windows;

#[cfg(unix)]
pub use unix::{
    atomic_write_0600, available_space, ensure_secure_directory, open_log_file_secure_append,
    same_volume, set_dir_mode_0700,
};

#[cfg(not(unix))]
pub use windows::{
    atomic_write_0600, available_space, ensure_secure_directory, open_log_file_secure_append,
    same_volume, set_dir_mode_0700,
};

pub use temp::{is_tmp_sibling_of, remove_tmp_siblings, tmp_sibling_name};

use std::path::{Path, PathBuf};

/// Walk up from `path` to the closest ancestor that exists (or `path` itself).
pub fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut cur = Some(path);
    while let Some(p) = cur {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        cur = p.parent();
    }
    None
}
