//! Integration tests for core CLI contract behavior.
//!
//! Nothing here needs hardware: the `check` and `info` subcommands run the
//! parser offline, and everything else is exercised only up to argument
//! handling.

use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("stmflash").expect("binary builds")
}

const SMALL_HEX: &str = ":020000040800F2\n:080000000102030405060708D4\n:00000001FF\n";

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("stmflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stmflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn check_accepts_valid_hex() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = dir.path().join("fw.hex");
    fs::write(&hex, SMALL_HEX).expect("write fixture");

    cli_cmd()
        .arg("check")
        .arg(&hex)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Check successful"));
}

#[test]
fn check_rejects_corrupt_hex() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = dir.path().join("fw.hex");
    // flip the data-line checksum
    fs::write(&hex, SMALL_HEX.replace("D4", "D5")).expect("write fixture");

    cli_cmd()
        .arg("check")
        .arg(&hex)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("bad checksum"));
}

#[test]
fn check_rejects_missing_eof() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = dir.path().join("fw.hex");
    fs::write(&hex, ":020000040800F2\n:080000000102030405060708D4\n").expect("write fixture");

    cli_cmd()
        .arg("check")
        .arg(&hex)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing EOF record"));
}

#[test]
fn info_reports_image_shape() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = dir.path().join("fw.hex");
    fs::write(&hex, SMALL_HEX).expect("write fixture");

    cli_cmd()
        .arg("info")
        .arg(&hex)
        .assert()
        .success()
        .stderr(predicate::str::contains("Pages:"))
        .stderr(predicate::str::contains("0x08000000"));
}

#[test]
fn info_json_is_valid_json_on_stdout_only() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = dir.path().join("fw.hex");
    fs::write(&hex, SMALL_HEX).expect("write fixture");

    let output = cli_cmd()
        .args(["info", "--json"])
        .arg(&hex)
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("stdout is JSON");
    assert_eq!(parsed["pages"], 1);
    assert_eq!(parsed["image_bytes"], 8);
    assert_eq!(parsed["address_min"], "0x08000000");
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.hex");

    cli_cmd()
        .arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn list_ports_json_returns_valid_json() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed = serde_json::from_str::<serde_json::Value>(&stdout).expect("valid JSON");
    assert!(parsed.is_array(), "list-ports --json should return an array");
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_zero_on_success() {
    cli_cmd().arg("--help").assert().success().code(0);
    cli_cmd().arg("--version").assert().success().code(0);
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0);
}

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    cli_cmd().arg("--invalid-flag-xyz").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_erase_without_all() {
    // refusing a bare `erase` is a usage error, not an I/O failure
    cli_cmd()
        .arg("erase")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn exit_code_one_for_missing_file() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("does_not_exist.hex");

    cli_cmd()
        .arg("check")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1);
}

// ============================================================================
// Unknown Command/Flag Suggestion Tests
// ============================================================================

#[test]
fn unknown_command_suggests_similar() {
    cli_cmd()
        .arg("flsah") // typo for flash
        .assert()
        .failure()
        .stderr(predicate::str::contains("flash").or(predicate::str::contains("did you mean")));
}

#[test]
fn unknown_flag_suggests_similar() {
    cli_cmd()
        .arg("list-ports")
        .arg("--jason") // typo for --json
        .assert()
        .failure()
        .stderr(predicate::str::contains("json").or(predicate::str::contains("did you mean")));
}

// ============================================================================
// stdout/stderr Separation Tests
// ============================================================================

#[test]
fn flash_without_args_writes_to_stderr_only() {
    cli_cmd()
        .arg("flash")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty().not());
}

#[test]
fn completions_command_writes_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("stmflash"));
}

// ============================================================================
// -- Option Terminator Tests
// ============================================================================

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");
    let weird = dir.path().join("-dashed.hex");
    fs::write(&weird, SMALL_HEX).expect("write fixture");

    cli_cmd()
        .current_dir(dir.path())
        .args(["check", "--", "-dashed.hex"])
        .assert()
        .success();
}

// ============================================================================
// TTY Detection Tests
// ============================================================================

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

#[test]
fn check_output_has_no_ansi_when_not_tty() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = dir.path().join("fw.hex");
    fs::write(&hex, SMALL_HEX).expect("write fixture");

    let output = cli_cmd()
        .arg("check")
        .arg(&hex)
        .assert()
        .success()
        .get_output()
        .clone();

    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf-8");
    assert!(!stderr.contains("\x1b["), "no ANSI codes on non-TTY stderr");
}

// ============================================================================
// Environment Variable Tests
// ============================================================================

#[test]
fn baud_environment_variable_is_recognized() {
    // invalid value must be rejected at parse time, proving the env var is read
    cli_cmd()
        .env("STMFLASH_BAUD", "not-a-number")
        .args(["list-ports"])
        .assert()
        .failure()
        .code(2);
}
