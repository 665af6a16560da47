//! CLI tests for `bisectbot` commands that never reach a real toolchain.
//!
//! Spawns the binary and checks exit codes for config bootstrap, static-table
//! resolution and rejected requests.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use bisectbot::exit_codes;
use bisectbot::io::config::{TriageConfig, load_config, write_config};

fn bisectbot(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bisectbot"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn bisectbot")
}

#[test]
fn init_writes_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = bisectbot(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join("bisectbot.toml")).expect("load");
    assert_eq!(cfg, TriageConfig::default());
}

#[test]
fn resolve_static_table_label_prints_commit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = bisectbot(temp.path(), &["resolve", "1.6.0"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "727c637");
}

#[test]
fn unauthorized_requester_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = TriageConfig::default();
    cfg.access.allow_all = false;
    write_config(&temp.path().join("locked.toml"), &cfg).expect("write config");
    fs::write(
        temp.path().join("request.md"),
        "!nim c\n```nim\necho 1\n```\n",
    )
    .expect("write request");

    let output = bisectbot(
        temp.path(),
        &[
            "triage",
            "--config",
            "locked.toml",
            "--request",
            "request.md",
            "--association",
            "none",
            "--login",
            "stranger",
        ],
    );

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not allowed"));
}

#[test]
fn chained_shell_commands_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("request.md"),
        "!nim c --run temp.nim && curl example.com\n```nim\necho 1\n```\n",
    )
    .expect("write request");

    let output = bisectbot(temp.path(), &["triage", "--request", "request.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("must not contain '&&'"));
    assert!(!temp.path().join("temp.nim").exists());
}
