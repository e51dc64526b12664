//! Partition a flat list of file names into groups sharing a base name.
//!
//! `IMG_0001.CR2`, `IMG_0001.jpg` and `IMG_0001.xmp` form one group keyed
//! `IMG_0001`; a group is the unit the planner never splits.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::errors::BatchError;
use crate::shutdown::CancelToken;

/// Cancellation is polled once per this many items in grouping and packing.
pub const CANCEL_CHECK_INTERVAL: usize = 5_000;

const IGNORED_NAMES: &[&str] = &[
    "desktop.ini",
    "thumbs.db",
    ".ds_store",
    "ehthumbs.db",
    "icon\r",
    ".localized",
    ".spotlight-v100",
    ".trashes",
    ".fseventsd",
];

const ALLOWED_EXTENSIONS: &[&str] = &[
    // still images
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "avif",
    // camera raw
    "raw", "cr2", "cr3", "crw", "nef", "nrw", "arw", "srf", "sr2", "orf", "rw2", "raf", "dng",
    "pef", "ptx", "rwl", "srw", "x3f", "3fr", "erf", "kdc", "mef", "mos", "mrw", "iiq",
    // sidecars
    "xmp",
    // video
    "mp4", "mov", "avi", "mkv", "m4v", "mts", "m2ts", "3gp", "wmv", "mpg", "mpeg", "webm",
];

/// A set of files sharing one base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub base_name: String,
    pub files: Vec<String>,
}

impl FileGroup {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Output of a grouping pass.
#[derive(Debug, Default, Clone)]
pub struct Grouping {
    /// base name -> member file names, sorted
    pub groups: HashMap<String, Vec<String>>,
    /// names dropped by the ignore list or the extension allow-list
    pub skipped: usize,
    /// names that made it into a group
    pub accepted: usize,
}

/// OS artifacts that never belong in a batch.
pub fn is_ignored_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("._") || IGNORED_NAMES.contains(&lower.as_str())
}

/// True when the extension is a supported photo, raw, sidecar or video type.
pub fn is_allowed_media(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Substring preceding the last `.`; `None` when there is no extension.
pub fn base_name(name: &str) -> Option<&str> {
    name.rfind('.').map(|i| &name[..i])
}

/// Group `names` by base name after filtering.
///
/// Returns `BatchError::Cancelled` if the token trips; no other error occurs.
pub fn group_files<S: AsRef<str>>(
    names: &[S],
    cancel: &CancelToken,
) -> Result<Grouping, BatchError> {
    let mut grouping = Grouping::default();

    for (i, name) in names.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        let name = name.as_ref();
        if is_ignored_name(name) || !is_allowed_media(name) {
            grouping.skipped += 1;
            continue;
        }
        // ".jpg" has an empty base; there is nothing to group it with.
        let base = match base_name(name) {
            Some(b) if !b.is_empty() => b,
            _ => {
                grouping.skipped += 1;
                continue;
            }
        };
        grouping
            .groups
            .entry(base.to_string())
            .or_default()
            .push(name.to_string());
        grouping.accepted += 1;
    }

    for files in grouping.groups.values_mut() {
        files.sort();
    }

    debug!(
        groups = grouping.groups.len(),
        accepted = grouping.accepted,
        skipped = grouping.skipped,
        "grouped files"
    );
    Ok(grouping)
}
