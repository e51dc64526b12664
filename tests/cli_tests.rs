//! Drive the binary against a throwaway config and state directory.

use assert_fs::TempDir;
use assert_fs::prelude::*;
use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};

fn setup() -> TempDir {
    let td = TempDir::new().unwrap();
    let state = td.child("state");
    td.child("config.xml")
        .write_str(&format!(
            "<config>\n  <state_dir>{}</state_dir>\n  <max_files_per_batch>2</max_files_per_batch>\n  <log_level>quiet</log_level>\n</config>\n",
            state.path().display()
        ))
        .unwrap();
    let photos = td.child("photos");
    photos.create_dir_all().unwrap();
    for name in ["IMG_0001.jpg", "IMG_0001.dng", "IMG_0002.jpg", "IMG_0003.mov", "todo.txt"] {
        photos.child(name).write_str(name).unwrap();
    }
    td
}

fn run(td: &TempDir, args: &[&str]) -> Output {
    let me = assert_cmd::cargo::cargo_bin!("batch_split");
    Command::new(me)
        .args(args)
        .env("BATCH_SPLIT_CONFIG", td.path().join("config.xml"))
        .output()
        .expect("spawn binary")
}

fn json(out: &Output) -> Value {
    assert!(
        out.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout is JSON")
}

fn photos(td: &TempDir) -> String {
    td.path().join("photos").display().to_string()
}

#[test]
fn scan_reports_groups() {
    let td = setup();
    let v = json(&run(&td, &["--json", "scan", &photos(&td)]));
    assert_eq!(v["media_files"], 4);
    assert_eq!(v["groups"], 3);
    assert_eq!(v["skipped_files"], 1);
}

#[test]
fn preview_uses_flags_over_config() {
    let td = setup();
    let v = json(&run(&td, &["--json", "preview", &photos(&td), "--max", "10"]));
    assert_eq!(v["batch_count"], 1);
    assert_eq!(v["total_files"], 4);
    assert!(!Path::new(&photos(&td)).join("batch_001").exists());
}

#[test]
fn run_history_undo_round_trip() {
    let td = setup();
    let p = photos(&td);

    let outcome = json(&run(&td, &["--json", "run", &p, "--prefix", "day"]));
    assert_eq!(outcome["batch_count"], 2);
    assert_eq!(outcome["report"]["processed"], 4);
    let id = outcome["operation_id"].as_str().unwrap().to_string();
    td.child("photos/day_001/IMG_0001.dng").assert_exists();

    let history = json(&run(&td, &["--json", "history"]));
    assert_eq!(history[0]["operation_id"], id.as_str());

    let check = json(&run(&td, &["--json", "check", &id]));
    assert_eq!(check["valid"], true);

    let undo = json(&run(&td, &["--json", "undo"]));
    assert_eq!(undo["restored"], 4);
    td.child("photos/IMG_0003.mov").assert_exists();
    assert!(!td.path().join("photos/day_001").exists());

    let status = json(&run(&td, &["--json", "status"]));
    assert!(status.is_null());
}

#[test]
fn missing_folder_fails() {
    let td = setup();
    let out = run(&td, &["run", &td.path().join("nope").display().to_string()]);
    assert!(!out.status.success());
}

trait AssertExists {
    fn assert_exists(&self);
}

impl AssertExists for assert_fs::fixture::ChildPath {
    fn assert_exists(&self) {
        assert!(self.path().exists(), "{} should exist", self.path().display());
    }
}
