use std::fs;
use std::process::Command;

use tempfile::tempdir;

mod common;

/// A config whose identity cannot exist, so verification must fail before
/// any ownership checks run.
fn write_bogus_identity_config(base: &std::path::Path) -> std::path::PathBuf {
    let config_path = base.join("provision.toml");
    fs::write(
        &config_path,
        r#"[identity]
user = "hyp-no-such-user-xyz"
group = "hyp-no-such-group-xyz"
home = "/nonexistent/hyp-verify-test"
"#,
    )
    .unwrap();
    config_path
}

#[test]
fn test_verify_fails_when_identity_missing() {
    let dir = tempdir().unwrap();
    let config_path = write_bogus_identity_config(dir.path());

    let output = Command::new(common::bin())
        .args(["verify", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("identity-exists"),
        "verify should report the missing identity; got:\n{}",
        stdout
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invariant violation"));
}

#[test]
fn test_verify_json_lists_violations() {
    let dir = tempdir().unwrap();
    let config_path = write_bogus_identity_config(dir.path());

    let output = Command::new(common::bin())
        .args(["--json", "verify", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let violations: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("verify --json must emit valid JSON");
    let list = violations.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["invariant"], "identity-exists");
    assert!(list[0]["detail"]
        .as_str()
        .unwrap()
        .contains("hyp-no-such-user-xyz"));
}

#[test]
fn test_verify_is_read_only() {
    let dir = tempdir().unwrap();
    let config_path = write_bogus_identity_config(dir.path());

    let output = Command::new(common::bin())
        .args(["verify", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(!output.status.success());
    // Nothing was created next to the config
    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1, "verify must not create files");
}
