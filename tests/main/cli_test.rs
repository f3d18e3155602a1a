//! CLI contract tests.

use std::fs;
use std::path::PathBuf;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    let source_result = fs::read_to_string(&path);
    assert!(source_result.is_ok());
    match source_result {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

#[test]
fn main_defines_subcommands() {
    let source = main_source();
    assert!(source.contains("Demo"));
    assert!(source.contains("Describe"));
}

#[test]
fn demo_installs_hangup_handler_for_second_pass() {
    let source = main_source();
    assert!(source.contains("SignalKind::hangup()"));
}

#[test]
fn main_uses_logging_module() {
    let source = main_source();
    assert!(source.contains("logging::init_cli"));
    assert!(source.contains("logging::init_production"));
}

#[test]
fn memory_demo_runs_both_passes() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = assert_cmd::Command::cargo_bin("keyring-agent")
        .expect("binary should build")
        .env("KEYRING_AGENT_CONFIG", tmp.path().join("absent.toml"))
        .env_remove("KEYRING_AGENT_LOG_DIR")
        .args(["--memory", "demo"])
        .output()
        .expect("binary should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("read: ok \"Hello World\"").count(), 2);
    assert_eq!(stdout.matches("read: error: key not found: test").count(), 2);
    assert!(stdout.contains("----"));
}
