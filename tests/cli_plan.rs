use std::process::Command;

use tempfile::tempdir;

mod common;

#[test]
fn test_plan_json_is_a_dry_run_receipt() {
    let dir = tempdir().unwrap();
    let config_path = common::write_source_tree(dir.path());

    let output = Command::new(common::bin())
        .args(["--json", "plan", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "plan failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let receipt: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("plan --json must emit valid JSON");
    assert_eq!(receipt["schema"], "hyp.provision.receipt.v1");
    assert_eq!(receipt["dry_run"], true);
    assert_eq!(receipt["listen_port"], 5000);

    let actions = receipt["actions"].as_array().unwrap();
    assert!(!actions.is_empty());
    let descriptions: Vec<&str> = actions
        .iter()
        .filter_map(|a| a["description"].as_str())
        .collect();
    assert!(descriptions
        .iter()
        .any(|d| d.contains("created system user 'hypothesis'")));
    assert!(descriptions
        .iter()
        .any(|d| d.contains("dropped privileges to hypothesis:hypothesis")));

    // The exported environment is already on the plan receipt
    assert_eq!(receipt["env"]["PYTHONIOENCODING"], "utf_8");
    assert_eq!(receipt["env"]["NODE_ENV"], "production");
}

#[test]
fn test_plan_human_output_is_marked_as_dry_run() {
    let dir = tempdir().unwrap();
    let config_path = common::write_source_tree(dir.path());

    let output = Command::new(common::bin())
        .args(["plan", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Provisioning plan (dry run)"));
    assert!(stdout.contains("[plan]"));
    assert!(stdout.contains("created system group 'hypothesis'"));
}

#[test]
fn test_plan_orders_dependency_install_before_asset_build() {
    let dir = tempdir().unwrap();
    let config_path = common::write_source_tree(dir.path());

    let output = Command::new(common::bin())
        .args(["plan", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let install_idx = stdout
        .find("installed python set")
        .expect("plan should include the python install");
    let assets_idx = stdout
        .find("built static assets")
        .expect("plan should include the asset build");
    assert!(install_idx < assets_idx);
}

#[test]
fn test_plan_makes_no_filesystem_changes() {
    let dir = tempdir().unwrap();
    let config_path = common::write_source_tree(dir.path());

    let before: Vec<_> = walk(dir.path());
    let output = Command::new(common::bin())
        .args(["plan", "--config"])
        .arg(&config_path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let after: Vec<_> = walk(dir.path());

    assert_eq!(before, after, "plan must not touch the source tree");
}

#[test]
fn test_plan_with_missing_explicit_config_fails() {
    let output = Command::new(common::bin())
        .args(["plan", "--config", "/nonexistent/provision.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

fn walk(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut paths = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            paths.push(path);
        }
    }
    paths.sort();
    paths
}
