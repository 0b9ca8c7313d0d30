use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn stderr_envelope(output: &std::process::Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .rev()
        .find(|l| l.starts_with('{'))
        .unwrap_or_else(|| panic!("no error envelope in stderr: {text}"));
    serde_json::from_str(line).expect("stderr envelope is valid json")
}

fn verify_json(path: &Path) -> Value {
    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "verify-snapshot", "--in"])
        .arg(path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

/// Run a skewed workload pinned to Robin Hood and snapshot the result.
fn robinhood_snapshot(dir: &Path) -> PathBuf {
    let csv = dir.join("skewed.csv");
    cargo_bin_cmd!("flexmap")
        .arg("generate-csv")
        .arg(&csv)
        .args([
            "--ops", "30000", "--read-ratio", "0.3", "--key-skew", "1.2", "--key-space",
            "4000", "--seed", "1234",
        ])
        .assert()
        .success();
    let snap = dir.join("rh.snap");
    cargo_bin_cmd!("flexmap")
        .args(["--mode", "fast-lookup", "run-csv"])
        .arg(&csv)
        .arg("--snapshot-out")
        .arg(&snap)
        .assert()
        .success();
    snap
}

#[test]
fn offline_compaction_preserves_contents() {
    let dir = TempDir::new().unwrap();
    let snap = robinhood_snapshot(dir.path());

    let before = verify_json(&snap);
    assert_eq!(before["kind"], "robinhood");
    let size_before = before["size"].as_u64().unwrap();
    assert!(size_before > 0);

    let compacted = dir.path().join("rh2.snap");
    cargo_bin_cmd!("flexmap")
        .args(["compact-snapshot", "--in"])
        .arg(&snap)
        .arg("--out")
        .arg(&compacted)
        .assert()
        .success();

    let after = verify_json(&compacted);
    assert_eq!(after["kind"], "robinhood");
    assert_eq!(after["tombstones"], 0);
    assert_eq!(after["size"].as_u64().unwrap(), size_before);
}

#[test]
fn compact_rejects_chaining_snapshot_with_policy_exit() {
    let dir = TempDir::new().unwrap();
    let snap = dir.path().join("ch.snap");
    cargo_bin_cmd!("flexmap")
        .args(["--mode", "fast-insert", "put", "alpha", "1", "--snapshot"])
        .arg(&snap)
        .assert()
        .success();
    assert_eq!(verify_json(&snap)["kind"], "chaining");

    let out = dir.path().join("never.snap");
    let output = cargo_bin_cmd!("flexmap")
        .args(["compact-snapshot", "--in"])
        .arg(&snap)
        .arg("--out")
        .arg(&out)
        .assert()
        .failure()
        .code(4)
        .get_output()
        .clone();
    let envelope = stderr_envelope(&output);
    assert_eq!(envelope["error"], "Policy");
    assert!(!out.exists(), "rejected compaction must not write output");
}

#[test]
fn tampered_snapshot_fails_verification_with_invariant_exit() {
    let dir = TempDir::new().unwrap();
    let snap = robinhood_snapshot(dir.path());
    let mut bytes = fs::read(&snap).unwrap();
    // Flip one byte well inside the payload.
    let pos = bytes.len() - 7;
    bytes[pos] ^= 0x40;
    let tampered = dir.path().join("tampered.snap");
    fs::write(&tampered, &bytes).unwrap();

    let output = cargo_bin_cmd!("flexmap")
        .args(["verify-snapshot", "--in"])
        .arg(&tampered)
        .assert()
        .failure()
        .code(3)
        .get_output()
        .clone();
    let envelope = stderr_envelope(&output);
    assert_eq!(envelope["error"], "Invariant");
}

#[test]
fn repair_rewrites_a_tombstoned_snapshot() {
    let dir = TempDir::new().unwrap();
    let snap = robinhood_snapshot(dir.path());
    let fixed = dir.path().join("fixed.snap");

    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "verify-snapshot", "--repair", "--in"])
        .arg(&snap)
        .arg("--out")
        .arg(&fixed)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["repaired"], true);

    let after = verify_json(&fixed);
    assert_eq!(after["tombstones"], 0);
    assert_eq!(after["size"], report["size"]);
}

#[test]
fn compressed_snapshots_verify_and_load() {
    let dir = TempDir::new().unwrap();
    let snap = dir.path().join("one.snap.gz");
    cargo_bin_cmd!("flexmap")
        .args(["put", "alpha", "1", "--snapshot"])
        .arg(&snap)
        .arg("--compress")
        .assert()
        .success();
    let report = verify_json(&snap);
    assert_eq!(report["compressed"], true);
    assert_eq!(report["size"], 1);

    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "get", "alpha", "--snapshot"])
        .arg(&snap)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["value"], "1");
}

#[test]
fn verify_rejects_garbage_files() {
    let dir = TempDir::new().unwrap();
    let junk = dir.path().join("junk.snap");
    fs::write(&junk, b"this is not a snapshot at all").unwrap();
    cargo_bin_cmd!("flexmap")
        .args(["verify-snapshot", "--in"])
        .arg(&junk)
        .assert()
        .failure()
        .code(3);
}
