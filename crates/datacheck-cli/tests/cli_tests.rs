//! CLI integration tests for datacheck.
//!
//! These tests cover argument parsing, help output and the exit codes of
//! configuration errors. None of them reach a database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the datacheck binary.
fn cmd() -> Command {
    Command::cargo_bin("datacheck").unwrap()
}

fn pgsql_args<'a>(extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![
        "pgsql",
        "--source",
        "127.0.0.1:5432",
        "--source-user",
        "checker",
        "--target",
        "127.0.0.1:5433",
        "--databases",
        "app",
    ];
    args.extend_from_slice(extra);
    args
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mysql"))
        .stdout(predicate::str::contains("pgsql"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("datacheck"));
}

#[test]
fn test_pgsql_subcommand_help() {
    cmd()
        .args(["pgsql", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--source-user"))
        .stdout(predicate::str::contains("--max-recheck-times"))
        .stdout(predicate::str::contains("--skip-cols"))
        .stdout(predicate::str::contains("--where"));
}

#[test]
fn test_mysql_subcommand_defaults() {
    cmd()
        .args(["mysql", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: fast]"))
        .stdout(predicate::str::contains("[default: 10000]"))
        .stdout(predicate::str::contains("[default: disable]"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("[default: datacheck.yaml]"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

// =============================================================================
// Argument Errors (clap exits with 2)
// =============================================================================

#[test]
fn test_unknown_mode_rejected() {
    cmd()
        .args(pgsql_args(&["--mode", "exact"]))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("expected count, fast or slow"));
}

#[test]
fn test_missing_databases_rejected() {
    cmd()
        .args([
            "mysql",
            "--source",
            "127.0.0.1:3306",
            "--source-user",
            "root",
            "--target",
            "127.0.0.1:3307",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--databases"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_missing_config_file_exits_with_code_1() {
    cmd()
        .args(["run", "--config", "nonexistent_config_file.yaml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["run", "--config", file.path().to_str().unwrap()])
        .assert()
        .code(1);
}

#[test]
fn test_empty_databases_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "type: pgsql").unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  endpoint: \"127.0.0.1:5432\"").unwrap();
    writeln!(file, "  user: checker").unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  endpoint: \"127.0.0.1:5433\"").unwrap();
    writeln!(file, "databases: []").unwrap();

    cmd()
        .args(["run", "--config", file.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at least one database"));
}

#[test]
fn test_endpoint_without_port_exits_with_code_1() {
    cmd()
        .args([
            "pgsql",
            "--source",
            "db-a",
            "--source-user",
            "checker",
            "--target",
            "127.0.0.1:5433",
            "--databases",
            "app",
        ])
        .assert()
        .code(1);
}

#[test]
fn test_same_database_on_same_server_exits_with_code_1() {
    cmd()
        .args([
            "pgsql",
            "--source",
            "127.0.0.1:5432",
            "--source-user",
            "checker",
            "--target",
            "127.0.0.1:5432",
            "--databases",
            "app",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot be the same database"));
}

#[test]
fn test_unknown_ssl_mode_exits_with_code_1() {
    cmd()
        .args(pgsql_args(&["--ssl-mode", "sometimes"]))
        .assert()
        .code(1);
}

#[test]
fn test_zero_parallel_exits_with_code_1() {
    cmd()
        .args(pgsql_args(&["--parallel", "0"]))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("check.parallel"));
}
