//! Runs the built binary end to end against the in-memory store.

use std::process::{Command, Output};

fn isolation_loadtest(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_isolation-loadtest"))
        .args(args)
        .env_remove("DATABASE_URL")
        .env("RUST_LOG", "isolation_loadtest=debug")
        .output()
        .unwrap()
}

/// Verify CLI command succeeded
fn assert_cli_success(output: &Output, command_desc: &str) {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        panic!(
            "{} failed!\nExit code: {:?}\nStdout: {}\nStderr: {}",
            command_desc,
            output.status.code(),
            stdout,
            stderr
        );
    }
}

fn last_json_line(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .rev()
        .find(|line| line.starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON summary in stdout:\n{stdout}"));
    serde_json::from_str(line).unwrap()
}

#[test]
fn test_zero_qps_rejected_before_connecting() {
    // No URL is given, so reaching the connect step would fail differently.
    let output = isolation_loadtest(&["transfer", "--qps", "0"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("target qps must be greater than zero"),
        "stderr: {stderr}"
    );
    assert!(!stderr.contains("--url"), "stderr: {stderr}");
}

#[test]
fn test_unknown_isolation_level_rejected() {
    let output = isolation_loadtest(&[
        "transfer",
        "--backend",
        "memory",
        "--isolation",
        "repeatable read",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid isolation level 'repeatable read'"),
        "stderr: {stderr}"
    );
}

#[test]
fn test_postgresql_backend_requires_url() {
    let output = isolation_loadtest(&["transfer", "--backend", "postgresql"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DATABASE_URL"), "stderr: {stderr}");
}

#[test]
fn test_memory_transfer_run_reports_conserved_total() {
    let output = isolation_loadtest(&[
        "transfer",
        "--backend",
        "memory",
        "--accounts",
        "100",
        "--selection",
        "10",
        "--qps",
        "50",
        "--concurrency",
        "4",
        "--duration",
        "2s",
        "--seed",
        "3",
        "--format",
        "json",
    ]);
    assert_cli_success(&output, "memory transfer run");

    let summary = last_json_line(&output);
    assert_eq!(summary["backend"], "memory");
    assert_eq!(summary["isolation"], "serializable");
    assert_eq!(summary["sample_size"], 10);
    assert_eq!(summary["invariant"]["expected"], "100000");
    assert_eq!(summary["invariant"]["difference"], "0");
    assert_eq!(summary["invariant"]["holds"], true);
    assert_eq!(summary["kinds"][0]["kind"], "transfer");
}

#[test]
fn test_memory_mixed_run_text_summary() {
    let output = isolation_loadtest(&[
        "mixed",
        "--backend",
        "memory",
        "--products",
        "50",
        "--read-qps",
        "20",
        "--write-qps",
        "5",
        "--duration",
        "1500ms",
    ]);
    assert_cli_success(&output, "memory mixed run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("isolation level:  SERIALIZABLE"), "stdout: {stdout}");
    assert!(stdout.contains("read:"), "stdout: {stdout}");
    assert!(stdout.contains("write:"), "stdout: {stdout}");
    assert!(!stdout.contains("expected balance"), "stdout: {stdout}");
}
