//! Integration tests for the `scriptbox` binary.
//!
//! Each test runs the built binary inside a scratch directory so no
//! `scriptbox.toml` from the workspace is picked up.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn hello() -> PathBuf {
    fixtures_dir().join("hello/main.sbs")
}

fn scriptbox(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_scriptbox"))
        .current_dir(cwd)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to spawn scriptbox")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ────────────────────────────────────────────────────────────────────────────
// run
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_calls_main_on_the_main_type() {
    let dir = tempfile::tempdir().unwrap();
    let hello = hello();
    let output = scriptbox(dir.path(), &["run", hello.to_str().unwrap()]);

    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("hello from scriptbox"));
    assert_eq!(text.lines().last(), Some("1"));
}

#[test]
fn test_run_named_entry_with_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let hello = hello();
    let output = scriptbox(
        dir.path(),
        &["run", "--entry", "Demo.Program.add", hello.to_str().unwrap(), "2", "3"],
    );

    assert!(output.status.success(), "{:?}", output);
    assert_eq!(stdout(&output).trim(), "5");
}

// ────────────────────────────────────────────────────────────────────────────
// check / build
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_check_accepts_the_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let hello = hello();
    let output = scriptbox(dir.path(), &["check", hello.to_str().unwrap()]);

    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("ok: 1 file(s), 1 type(s)"));
}

#[test]
fn test_check_rejects_broken_source() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.sbs");
    std::fs::write(&broken, "type {").unwrap();
    let output = scriptbox(dir.path(), &["check", broken.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(stdout(&output).contains("error["));
}

#[test]
fn test_policy_from_config_blocks_denied_library() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("strict.toml");
    std::fs::write(&config, "[security_policy.libraries]\ndeny = [\"console\"]\n").unwrap();
    let hello = hello();
    let output = scriptbox(
        dir.path(),
        &["--config", config.to_str().unwrap(), "check", hello.to_str().unwrap()],
    );

    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("security"));
    assert!(text.contains("console"));

    let output = scriptbox(
        dir.path(),
        &["--config", config.to_str().unwrap(), "check", "--no-verify", hello.to_str().unwrap()],
    );
    assert!(output.status.success(), "{:?}", output);
}

#[test]
fn test_build_writes_an_image_that_runs() {
    let dir = tempfile::tempdir().unwrap();
    let hello = hello();
    let output = scriptbox(
        dir.path(),
        &["build", hello.to_str().unwrap(), "--out-dir", "out", "--name", "hello"],
    );
    assert!(output.status.success(), "{:?}", output);

    let image = dir.path().join("out/hello.sbx");
    assert!(image.is_file());

    let output = scriptbox(dir.path(), &["run", image.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(stdout(&output).lines().last(), Some("1"));
}

#[test]
fn test_inspect_lists_members() {
    let dir = tempfile::tempdir().unwrap();
    let hello = hello();
    let output = scriptbox(dir.path(), &["inspect", hello.to_str().unwrap()]);

    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("pub type Demo.Program"));
    assert!(text.contains("static method add(a: int, b: int): int"));
    assert!(text.contains("import console Console.print(1)"));
}
