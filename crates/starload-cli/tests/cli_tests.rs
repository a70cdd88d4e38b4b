//! CLI integration tests for starload.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the starload binary.
fn cmd() -> Command {
    Command::cargo_bin("starload").unwrap()
}

fn config_file(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", yaml).unwrap();
    file
}

/// Warehouse on a port nothing listens on.
const UNREACHABLE: &str = r#"
warehouse: wh
databases:
  wh:
    host: 127.0.0.1
    port: 1
    database: warehouse
    user: loader
    ssl_mode: disable
tables:
  - name: RingDimension
    role: dimension
    columns:
      - name: name
        kind: natural_key
        type: varchar(40)
"#;

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("historical"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_update_subcommand_help() {
    cmd()
        .args(["update", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--since"))
        .stdout(predicate::str::contains("[default: all]"));
}

#[test]
fn test_historical_subcommand_help() {
    cmd()
        .args(["historical", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--since"))
        .stdout(predicate::str::contains("<TABLES>..."));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("starload"));
}

// =============================================================================
// Global Flag Tests
// =============================================================================

#[test]
fn test_config_flag_default() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: warehouse.yaml]"));
}

#[test]
fn test_log_format_flag() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_settings_dir_flag() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--settings-dir"));
}

// =============================================================================
// Error Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_file_exit_code() {
    // IO errors exit with code 7
    cmd()
        .args(["-c", "nonexistent_warehouse.yaml", "health-check"])
        .assert()
        .failure()
        .code(7);
}

#[test]
fn test_invalid_yaml_exit_code() {
    let file = config_file("warehouse: [unclosed");

    cmd()
        .args(["-c", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_empty_config_exit_code() {
    let file = config_file("");

    cmd()
        .args(["-c", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_undefined_warehouse_exit_code() {
    let file = config_file(
        r#"
warehouse: missing
databases:
  wh:
    host: localhost
    database: warehouse
    user: loader
"#,
    );

    cmd()
        .args(["-c", file.path().to_str().unwrap(), "build"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("warehouse 'missing'"));
}

#[test]
fn test_dimension_key_to_fact_is_schema_error() {
    let file = config_file(
        r#"
warehouse: wh
databases:
  wh:
    host: localhost
    database: warehouse
    user: loader
tables:
  - name: JourneyFact
    role: fact
    columns:
      - name: distance
        kind: metric
        type: int
  - name: BearerFact
    role: fact
    columns:
      - name: journey
        kind: dimension_key
        references: JourneyFact
"#,
    );

    cmd()
        .args(["-c", file.path().to_str().unwrap(), "build"])
        .assert()
        .failure()
        .code(3);
}

#[test]
fn test_empty_settings_dir_exit_code() {
    let dir = tempfile::tempdir().unwrap();

    cmd()
        .args(["--settings-dir", dir.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no settings file found"));
}

#[test]
fn test_unreachable_warehouse_is_unhealthy() {
    let file = config_file(UNREACHABLE);

    cmd()
        .args(["-c", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::contains("FAILED"))
        .stdout(predicate::str::contains("UNHEALTHY"));
}

#[test]
fn test_unreachable_warehouse_aborts_update() {
    let file = config_file(UNREACHABLE);

    cmd()
        .args(["-c", file.path().to_str().unwrap(), "update", "all"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_unknown_verbosity_exit_code() {
    cmd()
        .args(["--verbosity", "chatty", "health-check"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown verbosity"));
}

// =============================================================================
// Argument Parsing Tests
// =============================================================================

#[test]
fn test_short_config_flag() {
    // Should fail because the file doesn't exist, but the flag is accepted
    cmd()
        .args(["-c", "/nonexistent/warehouse.yaml", "build"])
        .assert()
        .failure()
        .code(7);
}

#[test]
fn test_malformed_since_is_rejected() {
    cmd()
        .args(["update", "--since", "last tuesday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YYYY-MM-DD HH:MM:SS"));
}

#[test]
fn test_historical_requires_tables() {
    cmd()
        .arg("historical")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<TABLES>"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
