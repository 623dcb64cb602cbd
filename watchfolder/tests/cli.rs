//! CLI tests for the `watchfolder` binary.
//!
//! Spawns the binary against temp directories and verifies exit codes and
//! filesystem effects for full runs, dry runs, resets, and corrupt state.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use watchfolder::exit_codes;
use watchfolder::test_support::TestDirs;

/// Write a `cp`-based config with a log file under the temp root.
fn write_cp_config(dirs: &TestDirs) -> PathBuf {
    let mut cfg = dirs.config(&["cp"]);
    cfg.log_files.watch = Some(dirs.root().join("logs").join("watch.log"));
    dirs.write_config(&cfg).expect("write config")
}

fn watchfolder(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_watchfolder"))
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("spawn watchfolder")
}

#[test]
fn no_arguments_prints_usage_and_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_watchfolder"))
        .output()
        .expect("spawn watchfolder");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn execute_run_processes_every_file_and_exits_ok() {
    let dirs = TestDirs::new().expect("dirs");
    dirs.add_input("img001.tif", "one").expect("input");
    dirs.add_input("img002.tif", "two").expect("input");
    let config = write_cp_config(&dirs);

    let output = watchfolder(&config, &["--execute", "--max-cycles", "20"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        TestDirs::names_in(&dirs.remote_output).expect("remote output"),
        vec!["img001.tif", "img002.tif"]
    );
    assert_eq!(
        dirs.read_ledger().expect("ledger"),
        vec!["img001.tif", "img002.tif"]
    );
    let log = fs::read_to_string(dirs.root().join("logs").join("watch.log")).expect("log file");
    assert!(log.contains("submitting file"));
}

#[test]
fn dry_run_leaves_directories_untouched() {
    let dirs = TestDirs::new().expect("dirs");
    dirs.add_input("img001.tif", "one").expect("input");
    dirs.add_input("img002.tif", "two").expect("input");
    let config = write_cp_config(&dirs);

    let output = watchfolder(&config, &["--max-cycles", "5"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(!dirs.ledger.exists());
    assert!(TestDirs::names_in(&dirs.massive_input).expect("ls").is_empty());
    assert!(TestDirs::names_in(&dirs.massive_output).expect("ls").is_empty());
    assert!(TestDirs::names_in(&dirs.remote_output).expect("ls").is_empty());
}

#[test]
fn reset_execute_clears_ledger_and_folders() {
    let dirs = TestDirs::new().expect("dirs");
    dirs.add_input("img001.tif", "one").expect("input");
    fs::write(dirs.massive_input.join("img001.tif"), "one").expect("staged");
    fs::write(dirs.massive_output.join("img001.tif"), "out").expect("output");
    fs::create_dir(dirs.remote_output.join("nested")).expect("nested dir");
    fs::write(&dirs.ledger, "[\n  \"img001.tif\"\n]\n").expect("ledger");
    let config = write_cp_config(&dirs);

    let output = watchfolder(&config, &["--reset", "--execute"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(!dirs.ledger.exists());
    for dir in [
        &dirs.remote_input,
        &dirs.remote_output,
        &dirs.massive_input,
        &dirs.massive_output,
    ] {
        assert!(dir.is_dir(), "{} kept", dir.display());
        assert_eq!(fs::read_dir(dir).expect("read dir").count(), 0);
    }
}

#[test]
fn reset_without_execute_deletes_nothing() {
    let dirs = TestDirs::new().expect("dirs");
    dirs.add_input("img001.tif", "one").expect("input");
    fs::write(&dirs.ledger, "[]\n").expect("ledger");
    let config = write_cp_config(&dirs);

    let output = watchfolder(&config, &["--reset"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(dirs.ledger.exists());
    assert!(dirs.remote_input.join("img001.tif").exists());
}

#[test]
fn corrupt_ledger_exits_fatal() {
    let dirs = TestDirs::new().expect("dirs");
    dirs.add_input("img001.tif", "one").expect("input");
    fs::write(&dirs.ledger, "{ not a list").expect("ledger");
    let config = write_cp_config(&dirs);

    let output = watchfolder(&config, &["--execute"]);

    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ledger"));
    assert!(TestDirs::names_in(&dirs.massive_input).expect("ls").is_empty());
}

#[test]
fn missing_config_exits_fatal() {
    let dirs = TestDirs::new().expect("dirs");

    let output = watchfolder(&dirs.root().join("absent.toml"), &["--execute"]);

    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
}
