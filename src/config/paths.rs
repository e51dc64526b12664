//! Default path helpers and symlink checks.
//! Determines OS-appropriate config/state/log paths and detects symlinked ancestors.

use anyhow::{Result, anyhow};
use dirs::{config_dir, data_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::CONFIG_ENV;

const APP_DIR: &str = "batch_split";

/// Config file path: `$BATCH_SPLIT_CONFIG` if set, else the OS config dir.
/// A relative override is resolved against the current directory.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(p) = env::var_os(CONFIG_ENV) {
        let p = PathBuf::from(p);
        if p.is_relative() {
            return Ok(env::current_dir()?.join(p));
        }
        return Ok(p);
    }
    let base = config_dir()
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok_or_else(|| anyhow!("cannot determine a config directory (no HOME)"))?;
    Ok(base.join(APP_DIR).join("config.xml"))
}

/// OS-appropriate data directory holding durable state.
pub fn default_state_dir() -> Result<PathBuf> {
    let base = data_dir()
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share")))
        .ok_or_else(|| anyhow!("cannot determine a data directory (no HOME)"))?;
    Ok(base.join(APP_DIR))
}

/// Suggested log file location (inside the default state dir).
pub fn default_log_path() -> Result<PathBuf> {
    Ok(default_state_dir()?.join("batch_split.log"))
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        if anc.exists() {
            let meta = fs::symlink_metadata(anc)?;
            if meta.file_type().is_symlink() {
                return Ok(true);
            }
        }
        p = anc.parent();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_override_wins() {
        let td = tempfile::tempdir().unwrap();
        let target = td.path().join("custom.xml");
        unsafe { env::set_var(CONFIG_ENV, &target) };
        let got = default_config_path().unwrap();
        unsafe { env::remove_var(CONFIG_ENV) };
        assert_eq!(got, target);
    }

    #[test]
    #[serial]
    fn default_path_ends_with_app_dir() {
        unsafe { env::remove_var(CONFIG_ENV) };
        if let Ok(p) = default_config_path() {
            assert!(p.ends_with("batch_split/config.xml"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn detects_symlinked_ancestor() {
        let td = tempfile::tempdir().unwrap();
        let real = td.path().join("real");
        fs::create_dir_all(&real).unwrap();
        let link = td.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        assert!(path_has_symlink_ancestor(&link.join("x.log")).unwrap());
        assert!(!path_has_symlink_ancestor(&real.join("x.log")).unwrap());
    }
}
