//! CLI binary smoke tests using assert_cmd.
//!
//! These exercise the compiled `rfex` binary: argument parsing, help text,
//! the loadData -> train sequence on a local CSV and the exit status of
//! failed runs.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

fn cmd() -> Command {
    Command::cargo_bin("rfex").unwrap()
}

fn write_csv(path: &Path) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "x1,x2,x3,x4,y").unwrap();
    for i in 0..30 {
        let label = i % 2;
        let x1 = if label == 1 { 1.5 } else { -1.5 } + (i % 3) as f64 * 0.1;
        writeln!(file, "{},{},{},{},c{}", x1, i % 5, (i * 7) % 4, i % 2 * 3, label).unwrap();
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[test]
fn no_args_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_flag() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--mode"))
        .stdout(predicate::str::contains("--attention-type"));
}

#[test]
fn version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rfex"));
}

#[test]
fn missing_task_errors() {
    cmd()
        .args(["--mode", "train", "--dataset-id", "31"])
        .assert()
        .failure();
}

#[test]
fn unknown_mode_errors() {
    cmd()
        .args(["--mode", "fit", "--dataset-id", "31", "--task", "binary"])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[test]
fn train_without_cache_fails() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args(["--mode", "train", "--dataset-id", "31", "--task", "binary"])
        .arg("--dataset-root")
        .arg(dir.path().join("datasets"))
        .arg("--result-root")
        .arg(dir.path().join("results"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("loadData"));
    assert!(!dir.path().join("results").exists());
}

#[test]
fn load_then_train_on_local_csv() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("toy.csv");
    write_csv(&csv);
    let common = |mode: &str| {
        let mut c = cmd();
        c.args(["--mode", mode, "--dataset-id", "0", "--task", "binary"])
            .arg("--csv")
            .arg(&csv)
            .arg("--dataset-root")
            .arg(dir.path().join("datasets"))
            .arg("--result-root")
            .arg(dir.path().join("results"))
            .args(["--folds", "2", "--random-features", "0", "--families", "KNN"]);
        c
    };

    common("loadData").assert().success();
    assert!(dir.path().join("datasets/binary/0/seed5/train/fold1.bin").exists());

    // a second load must not overwrite the cache
    common("loadData").assert().failure();

    common("train").assert().success();
    assert!(dir.path().join("results/binary/toy_accuracy.xlsx").exists());
    assert!(dir.path().join("results/binary/toy_explanation.xlsx").exists());
    assert!(dir.path().join("results/binary/toy_accuracy.html").exists());
}
