use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

const TRACE: &str = "voltage_uV,current_nA,current_out_nA
3000000,1000,500
3000000,1000,500
3100000,1200,500
2900000,900,400
3000000,1000,0
";

fn write_trace(dir: &Path) -> PathBuf {
    let path = dir.join("trace.csv");
    fs::write(&path, TRACE).unwrap();
    path
}

fn vsource() -> Command {
    Command::cargo_bin("vsource").unwrap()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["resolve", "--source", "bq25504"], 0, "converter_parameters", "stdout")]
#[case(&["resolve", "--source", "nope"], 3, "unknown source preset 'nope'", "stderr")]
#[case(&["resolve"], 2, "required", "stderr")]
#[case(&["resolve", "--source", "direct", "--samplerate", "0"], 4, "sample", "stderr")]
#[case(&["calibration", "--kernel"], 0, "52083", "stdout")]
#[case(&["calibration"], 0, "[emulator.adc_current]", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let assert = vsource().args(args).assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn resolve_prints_parseable_parameters() {
    let out = vsource()
        .args(["resolve", "--source", "direct"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["source"]["name"], "direct");
    assert_eq!(v["samplerate_sps"], 100_000.0);
    assert!(v["converter_parameters"].is_object());
    assert!(v["harvester_parameters"].is_object());
}

#[test]
fn simulate_writes_one_row_per_sample() {
    let dir = tempdir().unwrap();
    let trace = write_trace(dir.path());
    let output = dir.path().join("out.csv");

    vsource()
        .args(["simulate", "--source", "direct", "--input"])
        .arg(&trace)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("direct: 5 samples"));

    let written = fs::read_to_string(&output).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next(),
        Some("v_out_uV,v_mid_uV,p_in_fW,p_out_fW,power_good")
    );
    assert_eq!(lines.count(), 5);
}

#[test]
fn simulate_rejects_a_malformed_trace() {
    let dir = tempdir().unwrap();
    let trace = dir.path().join("trace.csv");
    fs::write(&trace, "voltage_uV,current_nA,current_out_nA\n3000000,lots,0\n").unwrap();

    vsource()
        .args(["simulate", "--source", "direct", "--input"])
        .arg(&trace)
        .arg("--output")
        .arg(dir.path().join("out.csv"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid trace row 2"));
}

#[test]
fn sweep_reports_sources_in_order() {
    let dir = tempdir().unwrap();
    let trace = write_trace(dir.path());

    let out = vsource()
        .args([
            "--json",
            "sweep",
            "--source",
            "diode_capacitor",
            "--source",
            "direct",
            "--input",
        ])
        .arg(&trace)
        .output()
        .unwrap();
    assert!(out.status.success());

    let stdout = String::from_utf8(out.stdout).unwrap();
    let summaries: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0]["source"], "diode_capacitor");
    assert_eq!(summaries[1]["source"], "direct");
    assert_eq!(summaries[1]["samples"], 5);
}

#[test]
fn emulating_an_ivcurve_harvester_is_a_build_error() {
    let dir = tempdir().unwrap();
    let catalog = dir.path().join("catalog.toml");
    fs::write(
        &catalog,
        "[sources.scan]\nbase = \"direct\"\nharvester = \"ivcurve\"\n",
    )
    .unwrap();

    vsource()
        .arg("--catalog")
        .arg(&catalog)
        .args(["resolve", "--source", "scan"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("How to fix"));
}

#[test]
fn catalog_cycle_is_a_config_error() {
    let dir = tempdir().unwrap();
    let catalog = dir.path().join("catalog.toml");
    fs::write(&catalog, "[sources.loop]\nbase = \"loop\"\n").unwrap();

    vsource()
        .arg("--catalog")
        .arg(&catalog)
        .args(["resolve", "--source", "loop"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("loop detected"));
}

#[test]
fn json_errors_are_structured() {
    let out = vsource()
        .args(["--json", "resolve", "--source", "nope"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(3));

    let stderr = String::from_utf8(out.stderr).unwrap();
    let line = stderr
        .lines()
        .rev()
        .find(|l| l.contains("\"exit_code\""))
        .expect("structured error line");
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["reason"], "ConfigError");
    assert_eq!(v["exit_code"], 3);
    assert!(v["chain"].as_array().is_some_and(|c| !c.is_empty()));
}

#[rstest]
fn fit_calibration_reports_bad_header() {
    let dir = tempdir().unwrap();
    let bad_csv = dir.path().join("measurements.csv");
    fs::write(&bad_csv, "raw,value\n100,0.0\n200,1.0\n").unwrap();

    vsource()
        .arg("fit-calibration")
        .arg("--measurements")
        .arg(&bad_csv)
        .arg("--output")
        .arg(dir.path().join("cal.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
fn fitted_calibration_is_usable() {
    let dir = tempdir().unwrap();
    let measurements = dir.path().join("measurements.csv");
    fs::write(
        &measurements,
        "component,channel,reference_si,raw\n\
         emulator,adc_current,0.0,100\n\
         emulator,adc_current,0.001,1100\n\
         emulator,adc_current,0.002,2100\n",
    )
    .unwrap();
    let cal = dir.path().join("cal.toml");

    vsource()
        .arg("fit-calibration")
        .arg("--measurements")
        .arg(&measurements)
        .arg("--output")
        .arg(&cal)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 measurements"));
    assert!(cal.exists());

    vsource()
        .arg("--calibration")
        .arg(&cal)
        .args(["--json", "calibration", "--kernel"])
        .assert()
        .success()
        .stdout(predicate::str::contains("adc_current_offset_na"));

    vsource()
        .arg("--calibration")
        .arg(&cal)
        .args(["simulate", "--source", "direct", "--input"])
        .arg(write_trace(dir.path()))
        .arg("--output")
        .arg(dir.path().join("out.csv"))
        .assert()
        .success();
}
