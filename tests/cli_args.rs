//! Integration tests for CLI argument handling
//!
//! Runs the binary for the offline subcommands and for argument errors.

use std::process::Command;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_censusbuddy"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("CENSUS_API_KEY")
        .output()
        .expect("Failed to execute censusbuddy")
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("censusbuddy"), "Help should mention censusbuddy");
    for subcommand in ["query", "vars", "geography", "tiger", "tiger-list", "fips"] {
        assert!(stdout.contains(subcommand), "Help should list {}", subcommand);
    }
}

#[test]
fn test_fips_state_lookup() {
    let output = run_cli(&["fips", "state", "calif"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "06");
}

#[test]
fn test_fips_state_reverse_lookup() {
    let output = run_cli(&["fips", "state", "78", "--reverse"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "VI");
}

#[test]
fn test_fips_county_and_cousub_lookup() {
    let output = run_cli(&["fips", "county", "CA", "los ang"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "037");

    let output = run_cli(&["fips", "cousub", "06", "37", "san fern"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "92785");
}

#[test]
fn test_fips_entity_lookup() {
    let output = run_cli(&["fips", "entity", "cousub"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "county subdivision");
}

#[test]
fn test_unknown_state_prints_error_and_exits() {
    let output = run_cli(&["fips", "state", "liforn"]);
    assert!(!output.status.success(), "Expected unknown state to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Could not find state"),
        "Should print lookup error: {}",
        stderr
    );
}

#[test]
fn test_query_without_api_key_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = run_cli(&[
        "--cache-dir",
        dir.path().to_str().unwrap(),
        "query",
        "--dataset",
        "ACSProfile5Y2015",
        "--get",
        "DP05_0001E",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Missing API key"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_geography_argument() {
    let output = run_cli(&["query", "-d", "X", "--get", "A", "--for", "state"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid geography"), "stderr: {}", stderr);
}

#[test]
fn test_tiger_dry_run_prints_paths() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = run_cli(&[
        "--cache-dir",
        dir.path().to_str().unwrap(),
        "tiger",
        "2016",
        "us",
        "state",
        "20m",
        "--dry-run",
    ]);
    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("cb_2016_us_state_20m.zip"));
    assert!(stdout.contains("cb_2016_us_state_20m.geojson"));
    assert!(!dir.path().join("tiger").exists(), "dry run must not create the cache dir");
}

#[test]
fn test_missing_subcommand_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
}

#[test]
fn test_fips_help_points_to_reference_dir() {
    let output = run_cli(&["fips", "--help"]);
    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("--reference-dir"));
    assert!(stdout.contains("single county subdivision"), "help: {}", stdout);
}

#[test]
fn test_fips_county_lookup_by_code() {
    let output = run_cli(&["fips", "county", "06", "075"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "075");
}
