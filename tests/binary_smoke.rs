// use macro form directly; no import needed
use std::process::Command;

#[test]
fn binary_print_config_succeeds() {
    let me = assert_cmd::cargo::cargo_bin!("batch_split");
    let out = Command::new(me)
        .arg("--print-config")
        .env_remove("BATCH_SPLIT_CONFIG")
        .output()
        .expect("spawn binary");
    assert!(out.status.success(), "binary should succeed with --print-config");
}

#[test]
fn binary_rejects_unknown_sort() {
    let me = assert_cmd::cargo::cargo_bin!("batch_split");
    let out = Command::new(me)
        .args(["preview", ".", "--sort", "shuffle"])
        .output()
        .expect("spawn binary");
    assert!(!out.status.success());
}
