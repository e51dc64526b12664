//! Verify XML config is parsed and used without touching user state.

use std::fs;
use std::time::Duration;
use tempfile::tempdir;

use batch_split::{LogLevel, SortPolicy, load_config_from_xml_path};

#[test]
fn reads_config_xml_and_applies_values() {
    let td = tempdir().expect("create tempdir");

    let cfg_path = td.path().join("config.xml");
    let state_dir = td.path().join("state");
    let log_file = td.path().join("batch_split.log");
    let photos = td.path().join("photos");

    let xml = format!(
        r#"
<config>
  <state_dir>{}</state_dir>
  <log_level>debug</log_level>
  <log_file>{}</log_file>
  <max_files_per_batch> 250 </max_files_per_batch>
  <batch_prefix>shoot</batch_prefix>
  <sort_by>date-desc</sort_by>
  <concurrency>4</concurrency>
  <flush_interval_ms>500</flush_interval_ms>
  <encrypt_state>false</encrypt_state>
  <allowed_root>{}</allowed_root>
</config>
"#,
        state_dir.display(),
        log_file.display(),
        photos.display()
    );
    fs::write(&cfg_path, xml).expect("write config.xml");

    let cfg = load_config_from_xml_path(&cfg_path).expect("load_config_from_xml_path");

    assert_eq!(cfg.state_dir, state_dir, "state_dir mismatch");
    assert_eq!(cfg.log_file.as_deref(), Some(log_file.as_path()), "log_file mismatch");
    assert_eq!(cfg.log_level, LogLevel::Debug, "log_level mismatch");
    assert_eq!(cfg.max_files_per_batch, 250);
    assert_eq!(cfg.batch_prefix, "shoot");
    assert_eq!(cfg.sort_by, SortPolicy::DateDesc);
    assert_eq!(cfg.concurrency, 4);
    assert_eq!(cfg.flush_interval, Duration::from_millis(500));
    assert!(!cfg.encrypt_state, "encrypt_state should be false");
    assert_eq!(cfg.allowed_roots, vec![photos]);
}

#[test]
fn unknown_element_is_rejected() {
    let td = tempdir().expect("create tempdir");
    let cfg_path = td.path().join("config.xml");
    fs::write(&cfg_path, "<config><batch_size>5</batch_size></config>").unwrap();
    assert!(load_config_from_xml_path(&cfg_path).is_err());
}

#[test]
fn bad_sort_policy_is_rejected() {
    let td = tempdir().expect("create tempdir");
    let cfg_path = td.path().join("config.xml");
    fs::write(&cfg_path, "<config><sort_by>shuffle</sort_by></config>").unwrap();
    let err = load_config_from_xml_path(&cfg_path).unwrap_err();
    assert!(format!("{err:#}").contains("shuffle"));
}
