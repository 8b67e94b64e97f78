//! CLI end-to-end tests.
//!
//! Validates:
//! - `flag` with a replayed battery writes `<var>_qc` series and a run report
//! - `--mask` and `--threshold` blank values in the written dataset
//! - Error paths map to the documented exit codes and write no output
//! - `presets`, `registry`, `config show` and `config validate`

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn gqc() -> Command {
    let mut cmd = cargo_bin_cmd!("gqc");
    cmd.timeout(Duration::from_secs(60));
    cmd.env_remove("GQC_LOG").env_remove("RUST_LOG");
    cmd
}

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn dataset() -> Value {
    json!({
        "time": [
            "2022-05-01T00:00:00Z",
            "2022-05-01T00:00:30Z",
            "2022-05-01T00:01:00Z",
            "2022-05-01T00:01:30Z"
        ],
        "variables": {
            "latitude": {"values": [57.70, 57.71, 57.72, 57.73]},
            "longitude": {"values": [11.80, 11.81, 11.82, 11.83]},
            "temperature": {
                "values": [10.1, 10.2, 45.0, 10.3],
                "attrs": {"long_name": "water temperature", "standard_name": "sea_water_temperature"}
            },
            "salinity": {"values": [7.1, 12.0, 7.2, null]},
            "density": {"values": [1005.1, 1008.0, 1004.2, null]},
            "oxygen_concentration": {"values": [280.0, 281.0, 279.0, 278.0]}
        },
        "attrs": {
            "oxygen": "{'make_model': 'RBR coda T.ODO', 'calibration_date': '2021-11-03'}"
        }
    })
}

fn replay() -> Value {
    json!({
        "battery": "ioos_qc",
        "version": "2.1.0",
        "results": {
            "TEMP": [
                {"test": "gross_range_test", "flags": [1, 1, 4, 1]},
                {"test": "spike_test", "flags": [1, 1, 3, 1]}
            ],
            "PSAL": [
                {"test": "gross_range_test", "flags": [1, 3, 1, 9]}
            ],
            "oxygen_concentration": [
                {"test": "gross_range_test", "flags": [1, 1, 1, 1]}
            ]
        }
    })
}

struct Fixture {
    _dir: tempfile::TempDir,
    input: std::path::PathBuf,
    replay: std::path::PathBuf,
    output: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let input = dir.path().join("deployment.json");
    let replay_path = dir.path().join("replay.json");
    write_json(&input, &dataset());
    write_json(&replay_path, &replay());
    Fixture {
        output: dir.path().join("flagged.json"),
        input,
        replay: replay_path,
        _dir: dir,
    }
}

fn flag_cmd(f: &Fixture) -> Command {
    let mut cmd = gqc();
    cmd.arg("flag")
        .arg("--input")
        .arg(&f.input)
        .arg("--output")
        .arg(&f.output)
        .arg("--replay")
        .arg(&f.replay);
    cmd
}

// ============================================================================
// flag
// ============================================================================

#[test]
fn flag_writes_qc_series_and_report() {
    let f = fixture();
    let stdout = flag_cmd(&f)
        .assert()
        .success()
        .code(0)
        .get_output()
        .stdout
        .clone();

    let report: Value = serde_json::from_slice(&stdout).expect("report is JSON");
    assert_eq!(report["preset"], "ioos-qartod-v1");
    assert_eq!(report["battery"], "ioos_qc");
    assert_eq!(report["observations"], 4);
    assert!(report["run_id"].as_str().unwrap().starts_with("qc-"));

    let out: Value = serde_json::from_str(&fs::read_to_string(&f.output).unwrap()).unwrap();
    let flags = &out["flags"];
    assert_eq!(flags["temperature_qc"]["flags"], json!([1, 1, 4, 1]));
    assert_eq!(flags["salinity_qc"]["flags"], json!([1, 3, 1, 9]));
    assert_eq!(flags["density_qc"]["flags"], json!([1, 3, 4, 9]));
    // coda optode calibrated before mid-2022
    assert_eq!(flags["oxygen_concentration_qc"]["flags"], json!([3, 3, 3, 3]));
    assert!(flags["oxygen_concentration_qc"]["attrs"]["comment"]
        .as_str()
        .unwrap()
        .starts_with("Oxygen optode improperly calibrated"));
    assert_eq!(
        flags["temperature_qc"]["attrs"]["long_name"],
        "quality control flags for water temperature"
    );
    assert_eq!(flags["temperature_qc"]["attrs"]["quality_control_set"], 1);
    assert_eq!(out["attrs"]["processing_level"], "L1. Quality control flags");
    assert_eq!(out["attrs"]["qc_preset"], "ioos-qartod-v1");
    assert!(out["flags"].get("chlorophyll_qc").is_none());
}

#[test]
fn flag_with_mask_blanks_values() {
    let f = fixture();
    flag_cmd(&f)
        .args(["--mask", "--threshold", "temperature=3"])
        .assert()
        .success();

    let out: Value = serde_json::from_str(&fs::read_to_string(&f.output).unwrap()).unwrap();
    // temperature threshold 3: only the fail flag is blanked
    assert_eq!(
        out["variables"]["temperature"]["values"],
        json!([10.1, 10.2, null, 10.3])
    );
    // salinity default threshold 2: suspect and missing flags are blanked
    assert_eq!(
        out["variables"]["salinity"]["values"],
        json!([7.1, null, 7.2, null])
    );
    assert_eq!(out["flags"]["salinity_qc"]["flags"], json!([1, 3, 1, 9]));
}

#[test]
fn flag_json_logs_go_to_stderr() {
    let f = fixture();
    flag_cmd(&f)
        .args(["--log-format", "json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("\"level\":\"INFO\""));
}

#[test]
fn empty_dataset_reports_zero_percent() {
    let f = fixture();
    write_json(
        &f.input,
        &json!({
            "time": [],
            "variables": {
                "latitude": {"values": []},
                "longitude": {"values": []},
                "temperature": {"values": []}
            }
        }),
    );
    let stdout = flag_cmd(&f).assert().success().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&stdout).unwrap();
    assert_eq!(report["observations"], 0);
    let temperature = report["aggregation"]["variables"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["variable"] == "temperature")
        .unwrap();
    assert_eq!(temperature["reason"], "empty_series");
    assert_eq!(temperature["summary"]["flagged_percentage"], json!(0.0));

    let out: Value = serde_json::from_str(&fs::read_to_string(&f.output).unwrap()).unwrap();
    assert_eq!(out["flags"]["temperature_qc"]["flags"], json!([]));
}

#[test]
fn unrecorded_variable_stays_unflagged() {
    let f = fixture();
    let mut partial = replay();
    partial["results"].as_object_mut().unwrap().remove("TEMP");
    write_json(&f.replay, &partial);
    flag_cmd(&f).assert().success();

    let out: Value = serde_json::from_str(&fs::read_to_string(&f.output).unwrap()).unwrap();
    let flags = &out["flags"];
    assert_eq!(flags["temperature_qc"]["flags"], json!([2, 2, 2, 2]));
    assert_eq!(flags["temperature_qc"]["attrs"]["quality_control_set"], 0);
    assert_eq!(flags["density_qc"]["attrs"]["quality_control_set"], 0);
}

// ============================================================================
// Error paths
// ============================================================================

#[test]
fn unknown_threshold_variable_exits_11() {
    let f = fixture();
    flag_cmd(&f)
        .args(["--mask", "--threshold", "salinty=3"])
        .assert()
        .code(11)
        .stderr(predicate::str::contains("unknown variable: salinty"));
    assert!(!f.output.exists());
}

#[test]
fn unknown_preset_exits_10() {
    let f = fixture();
    flag_cmd(&f)
        .args(["--preset", "argo-v9"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("unknown preset"));
    assert!(!f.output.exists());
}

#[test]
fn missing_input_exits_13() {
    let f = fixture();
    fs::remove_file(&f.input).unwrap();
    flag_cmd(&f).assert().code(13);
    assert!(!f.output.exists());
}

#[test]
fn short_battery_series_exits_11_without_output() {
    let f = fixture();
    let mut bad = replay();
    bad["results"]["TEMP"][0]["flags"] = json!([1, 1]);
    write_json(&f.replay, &bad);
    flag_cmd(&f)
        .assert()
        .code(11)
        .stderr(predicate::str::contains("length mismatch"));
    assert!(!f.output.exists());
}

#[test]
fn missing_axis_exits_11() {
    let f = fixture();
    let mut ds = dataset();
    ds["variables"].as_object_mut().unwrap().remove("longitude");
    write_json(&f.input, &ds);
    flag_cmd(&f)
        .assert()
        .code(11)
        .stderr(predicate::str::contains("longitude"));
}

#[test]
fn malformed_replay_exits_12() {
    let f = fixture();
    fs::write(&f.replay, "{ not json").unwrap();
    flag_cmd(&f).assert().code(12);
}

#[test]
fn out_of_scale_threshold_exits_10() {
    let f = fixture();
    flag_cmd(&f)
        .args(["--mask", "--default-threshold", "7"])
        .assert()
        .code(10);
    assert!(!f.output.exists());
}

#[cfg(unix)]
#[test]
fn failing_battery_program_exits_12() {
    let f = fixture();
    gqc()
        .arg("flag")
        .arg("--input")
        .arg(&f.input)
        .arg("--output")
        .arg(&f.output)
        .args(["--battery-cmd", "sh", "--battery-arg", "-c", "--battery-arg", "exit 2"])
        .assert()
        .code(12);
    assert!(!f.output.exists());
}

#[test]
fn battery_source_is_required() {
    gqc()
        .args(["flag", "--input", "a.json", "--output", "b.json"])
        .assert()
        .code(10);
}

// ============================================================================
// Informational commands
// ============================================================================

#[test]
fn presets_lists_both_versions() {
    let stdout = gqc().arg("presets").assert().success().get_output().stdout.clone();
    let presets: Value = serde_json::from_slice(&stdout).unwrap();
    let names: Vec<&str> = presets
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["ioos-qartod-v1", "cotede-eurogoos-v1"]);
    assert_eq!(presets[1]["scale"], "imos");
}

#[test]
fn registry_lists_primaries_first() {
    let stdout = gqc().arg("registry").assert().success().get_output().stdout.clone();
    let registry: Value = serde_json::from_slice(&stdout).unwrap();
    assert_eq!(registry[0]["name"], "temperature");
    assert_eq!(registry[0]["alias"], "TEMP");
    assert_eq!(registry[4]["name"], "conductivity");
    assert_eq!(registry[4]["role"], "derived");
}

#[test]
fn config_show_then_validate_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bundle.json");
    let stdout = gqc()
        .args(["config", "show", "--preset", "cotede-eurogoos-v1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    fs::write(&path, &stdout).unwrap();

    gqc()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"));
}

#[test]
fn tampered_bundle_fails_validation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bundle.json");
    let stdout = gqc()
        .args(["config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let mut bundle: Value = serde_json::from_slice(&stdout).unwrap();
    bundle["config"]["masking"]["default_threshold"] = json!(3);
    write_json(&path, &bundle);

    gqc()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .code(10)
        .stderr(predicate::str::contains("hash mismatch"));
}

#[test]
fn bundle_naming_unknown_variable_fails_validation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bundle.json");
    let stdout = gqc()
        .args(["config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let mut bundle: Value = serde_json::from_slice(&stdout).unwrap();
    bundle["config_hash"] = Value::Null;
    bundle["config"]["overrides"][0]["target"] = json!("oxygen_concentraton");
    write_json(&path, &bundle);

    gqc()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .code(11)
        .stderr(predicate::str::contains("oxygen_concentraton"));
}

#[test]
fn flag_with_config_bundle() {
    let f = fixture();
    let bundle_path = f.output.with_file_name("bundle.json");
    let stdout = gqc()
        .args(["config", "show", "--preset", "ioos-qartod-v1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    fs::write(&bundle_path, &stdout).unwrap();

    flag_cmd(&f)
        .arg("--config")
        .arg(&bundle_path)
        .assert()
        .success();
    assert!(f.output.exists());
}
