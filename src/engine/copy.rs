//! Verified copy-and-rename:
//! - Copies to a hidden temp sibling in the destination directory
//! - Verifies both the copied byte count and the temp file length against the source
//! - Carries the source mtime over (best-effort)
//! - Renames temp -> dest, fsyncs the destination directory
//! - Deletes the source only after all of the above succeeded (move)
//!
//! Re-running a transfer is safe: an already-relocated file counts as done,
//! partial temp files from an interrupted attempt are swept first and an
//! unrelated file at the destination is never overwritten.

use std::fs;
use std::io;
use std::path::Path;

use filetime::FileTime;
use tracing::{debug, trace};

use super::helpers::transfer_error;
use super::{io_copy, util};
use crate::errors::TransferError;
use crate::platform::{remove_tmp_siblings, tmp_sibling_name};

/// Copy `src` to `dest` with size verification; remove `src` afterwards when `delete_source`.
pub fn transfer_verified(
    src: &Path,
    dest: &Path,
    delete_source: bool,
    preserve_mtime: bool,
) -> Result<(), TransferError> {
    transfer_verified_with(src, dest, delete_source, preserve_mtime, io_copy::copy_streaming)
}

pub(crate) fn transfer_verified_with<F>(
    src: &Path,
    dest: &Path,
    delete_source: bool,
    preserve_mtime: bool,
    copier: F,
) -> Result<(), TransferError>
where
    F: Fn(&Path, &Path) -> io::Result<u64>,
{
    let src_meta = match fs::metadata(src) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if delete_source && util::exists_no_follow(dest) {
                trace!(dest = %dest.display(), "already moved");
                return Ok(());
            }
            return Err(TransferError::SourceMissing(src.to_path_buf()));
        }
        Err(e) => return Err(transfer_error("stat source", src)(e)),
    };
    let expected = src_meta.len();

    if let Ok(existing) = fs::symlink_metadata(dest) {
        if existing.is_file() && existing.len() == expected {
            // An earlier attempt finished the copy.
            if delete_source {
                fs::remove_file(src).map_err(transfer_error("remove source", src))?;
            }
            trace!(dest = %dest.display(), "destination already complete");
            return Ok(());
        }
        return Err(TransferError::DestinationExists(dest.to_path_buf()));
    }

    let dest_dir = dest
        .parent()
        .ok_or_else(|| TransferError::Io(format!("destination has no parent: {}", dest.display())))?;
    fs::create_dir_all(dest_dir).map_err(transfer_error("create destination directory", dest_dir))?;

    // Partial copies left by an interrupted earlier attempt.
    let stale = remove_tmp_siblings(dest);
    if stale > 0 {
        debug!(dest = %dest.display(), stale, "removed partial copies from an earlier attempt");
    }

    let tmp = tmp_sibling_name(dest);
    let copied = match copier(src, &tmp) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(transfer_error("copy to temporary file", &tmp)(e));
        }
    };
    let on_disk = match fs::metadata(&tmp) {
        Ok(m) => m.len(),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(transfer_error("stat temporary file", &tmp)(e));
        }
    };
    if copied != expected || on_disk != expected {
        let _ = fs::remove_file(&tmp);
        return Err(TransferError::SizeMismatch {
            path: src.to_path_buf(),
            expected,
            actual: if copied != expected { copied } else { on_disk },
        });
    }

    if preserve_mtime {
        let mtime = FileTime::from_last_modification_time(&src_meta);
        if let Err(e) = filetime::set_file_mtime(&tmp, mtime) {
            debug!(path = %tmp.display(), error = %e, "could not preserve mtime");
        }
    }

    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(transfer_error("rename temporary file into place", dest)(e));
    }
    let _ = util::fsync_dir(dest_dir);

    if delete_source {
        fs::remove_file(src).map_err(transfer_error("remove source after verified copy", src))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn truncating_copier(src: &Path, dst: &Path) -> io::Result<u64> {
        let data = fs::read(src)?;
        let half = &data[..data.len() / 2];
        let mut f = fs::OpenOptions::new().write(true).create_new(true).open(dst)?;
        f.write_all(half)?;
        Ok(half.len() as u64)
    }

    #[test]
    fn truncated_copy_keeps_source_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("IMG_0001.jpg");
        let dest = dir.path().join("out/batch_001/IMG_0001.jpg");
        fs::write(&src, vec![7u8; 4096]).unwrap();

        let err = transfer_verified_with(&src, &dest, true, true, truncating_copier).unwrap_err();
        assert!(matches!(err, TransferError::SizeMismatch { expected: 4096, actual: 2048, .. }));
        assert!(src.exists(), "source must survive a failed verification");
        assert!(!dest.exists());
        let leftovers = fs::read_dir(dest.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 0, "temp file must be removed");
    }

    #[test]
    fn move_deletes_source_after_verify() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("b/a.jpg");
        fs::write(&src, b"payload").unwrap();
        transfer_verified(&src, &dest, true, true).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn preserves_mtime() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("b/a.jpg");
        fs::write(&src, b"x").unwrap();
        let t = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, t).unwrap();
        transfer_verified(&src, &dest, false, true).unwrap();
        let got = FileTime::from_last_modification_time(&fs::metadata(&dest).unwrap());
        assert_eq!(got.unix_seconds(), 1_600_000_000);
    }

    #[test]
    fn rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("b/a.jpg");
        fs::write(&src, b"abc").unwrap();
        transfer_verified(&src, &dest, false, false).unwrap();
        // copy again: same size at destination counts as done
        transfer_verified(&src, &dest, false, false).unwrap();
        // move after copy: source removed, destination kept
        transfer_verified(&src, &dest, true, false).unwrap();
        assert!(!src.exists());
        // move again: source gone, destination present
        transfer_verified(&src, &dest, true, false).unwrap();
    }

    #[test]
    fn partial_copy_from_interrupted_attempt_is_swept() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("batch_001/a.jpg");
        fs::write(&src, b"full payload").unwrap();
        fs::create_dir(dir.path().join("batch_001")).unwrap();
        let stale = tmp_sibling_name(&dest);
        fs::write(&stale, b"full").unwrap();

        transfer_verified(&src, &dest, true, false).unwrap();
        assert!(!stale.exists());
        let names: Vec<_> = fs::read_dir(dir.path().join("batch_001"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.jpg")]);
    }

    #[test]
    fn different_destination_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("a_other.jpg");
        fs::write(&src, b"abc").unwrap();
        fs::write(&dest, b"something else").unwrap();
        let err = transfer_verified(&src, &dest, true, false).unwrap_err();
        assert!(matches!(err, TransferError::DestinationExists(_)));
        assert!(src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"something else");
    }
}
