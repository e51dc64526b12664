//! `BATCH_SPLIT_CONFIG` selects the config file; serialized because it mutates the process env.

use serial_test::serial;
use std::env;
use std::fs;
use tempfile::tempdir;

use batch_split::config::{CONFIG_ENV, LoadResult, load_or_init};
use batch_split::default_config_path;

struct EnvGuard(Option<std::ffi::OsString>);

impl EnvGuard {
    fn set(value: &std::path::Path) -> Self {
        let prev = env::var_os(CONFIG_ENV);
        // SAFETY: tests touching the environment run under #[serial].
        unsafe { env::set_var(CONFIG_ENV, value) };
        Self(prev)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: see EnvGuard::set.
        unsafe {
            match &self.0 {
                Some(v) => env::set_var(CONFIG_ENV, v),
                None => env::remove_var(CONFIG_ENV),
            }
        }
    }
}

#[test]
#[serial]
fn env_var_points_at_explicit_file() {
    let td = tempdir().unwrap();
    let path = td.path().join("custom.xml");
    fs::write(&path, "<config><batch_prefix>roll</batch_prefix></config>").unwrap();
    let _g = EnvGuard::set(&path);

    assert_eq!(default_config_path().unwrap(), path);
    match load_or_init().unwrap() {
        LoadResult::Loaded(cfg, p) => {
            assert_eq!(p, path);
            assert_eq!(cfg.batch_prefix, "roll");
        }
        other => panic!("expected Loaded, got {other:?}"),
    }
}

#[test]
#[serial]
fn explicit_missing_file_is_an_error() {
    let td = tempdir().unwrap();
    let _g = EnvGuard::set(&td.path().join("absent.xml"));
    assert!(load_or_init().is_err());
    assert!(!td.path().join("absent.xml").exists(), "no template for explicit paths");
}
