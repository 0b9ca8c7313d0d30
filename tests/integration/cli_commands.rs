use std::fs;
use std::path::PathBuf;

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

#[test]
fn put_then_get_roundtrips_through_a_snapshot() {
    let dir = TempDir::new().unwrap();
    let snap = dir.path().join("oneshot.snap");

    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "put", "alpha", "1", "--snapshot"])
        .arg(&snap)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["ok"], true);
    assert_eq!(json["changed"], true);
    assert_eq!(json["size"], 1);
    assert!(snap.exists());

    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "get", "alpha", "--snapshot"])
        .arg(&snap)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["found"], true);
    assert_eq!(json["value"], "1");
}

#[test]
fn del_and_items_respect_snapshot_state() {
    let dir = TempDir::new().unwrap();
    let snap = dir.path().join("oneshot.snap");

    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        cargo_bin_cmd!("flexmap")
            .args(["put", key, value, "--snapshot"])
            .arg(&snap)
            .assert()
            .success();
    }
    cargo_bin_cmd!("flexmap")
        .args(["del", "b", "--snapshot"])
        .arg(&snap)
        .assert()
        .success();

    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "items", "--snapshot"])
        .arg(&snap)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["count"], 2);
    let mut keys: Vec<&str> = json["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|pair| pair[0].as_str().unwrap())
        .collect();
    keys.sort();
    assert_eq!(keys, ["a", "c"]);
}

#[test]
fn get_missing_key_reports_absent_with_exit_zero() {
    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "get", "nope"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["found"], false);
}

#[test]
fn generate_csv_is_deterministic_in_seed() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.csv");
    let b = dir.path().join("b.csv");
    for path in [&a, &b] {
        cargo_bin_cmd!("flexmap")
            .arg("generate-csv")
            .arg(path)
            .args(["--ops", "2000", "--seed", "7", "--key-space", "200"])
            .assert()
            .success();
    }
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    let text = fs::read_to_string(&a).unwrap();
    assert!(text.starts_with("op,key,value\n"));
    assert_eq!(text.lines().count(), 2001);
}

#[test]
fn profile_reports_a_winner_mode() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("w.csv");
    cargo_bin_cmd!("flexmap")
        .arg("generate-csv")
        .arg(&csv)
        .args(["--ops", "3000", "--seed", "3", "--key-space", "500"])
        .assert()
        .success();
    let output = cargo_bin_cmd!("flexmap")
        .args(["--json", "profile"])
        .arg(&csv)
        .args(["--sample-ops", "1000"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["rows_sampled"], 1000);
    let winner = json["winner_mode"].as_str().unwrap();
    assert!(["fast-insert", "fast-lookup"].contains(&winner));
}

#[test]
fn profile_then_chains_into_run_csv() {
    let dir = TempDir::new().unwrap();
    let csv = dir.path().join("w.csv");
    let summary = dir.path().join("summary.json");
    cargo_bin_cmd!("flexmap")
        .arg("generate-csv")
        .arg(&csv)
        .args(["--ops", "2000", "--seed", "3", "--key-space", "300"])
        .assert()
        .success();
    cargo_bin_cmd!("flexmap")
        .arg("profile")
        .arg(&csv)
        .args(["--sample-ops", "500", "--then", "run-csv"])
        .arg(&csv)
        .arg("--json-summary-out")
        .arg(&summary)
        .assert()
        .success();
    let json: Value = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["ops"], 2000);
    // The chained run inherited the winner's pinned mode.
    assert!(["chaining", "robinhood"].contains(&json["backend"].as_str().unwrap()));
}

#[test]
fn config_file_shapes_the_engine() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("flexmap.toml");
    fs::write(
        &config,
        "[map]\ninitial_buckets = 128\n\n[guardrails]\nmax_group_len = \"none\"\n",
    )
    .unwrap();
    cargo_bin_cmd!("flexmap")
        .args(["--config"])
        .arg(&config)
        .args(["put", "k", "v"])
        .assert()
        .success();
}

#[test]
fn unknown_config_key_exits_bad_input() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[map]\nbogus_knob = 3\n").unwrap();
    let output = cargo_bin_cmd!("flexmap")
        .args(["--config"])
        .arg(&config)
        .args(["put", "k", "v"])
        .assert()
        .failure()
        .code(2)
        .get_output()
        .clone();
    let envelope = stderr_envelope(&output);
    assert_eq!(envelope["error"], "BadInput");
    assert!(envelope["detail"].as_str().unwrap().contains("bogus_knob"));
}

#[test]
fn config_type_violation_exits_bad_input() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[guardrails]\nmax_lf_chaining = \"lots\"\n").unwrap();
    cargo_bin_cmd!("flexmap")
        .args(["--config"])
        .arg(&config)
        .args(["put", "k", "v"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn missing_csv_exits_io() {
    let missing = PathBuf::from("/nonexistent/trace.csv");
    let output = cargo_bin_cmd!("flexmap")
        .arg("run-csv")
        .arg(&missing)
        .assert()
        .failure()
        .code(5)
        .get_output()
        .clone();
    let envelope = stderr_envelope(&output);
    assert_eq!(envelope["error"], "IO");
}
