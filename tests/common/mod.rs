//! Shared helpers for CLI integration tests.

pub mod fixtures;

use std::fs;
use std::path::{Path, PathBuf};

/// Lay out a minimal application source tree under `base/src` and write a
/// `provision.toml` pointing at it. Returns the config path.
pub fn write_source_tree(base: &Path) -> PathBuf {
    let src = base.join("src");
    fs::create_dir_all(src.join("conf")).unwrap();
    fs::create_dir_all(src.join("scripts/gulp")).unwrap();
    fs::create_dir_all(src.join("h/static/scripts")).unwrap();

    fs::write(src.join("requirements.txt"), fixtures::PYTHON_MANIFEST).unwrap();
    fs::write(src.join("package.json"), fixtures::NODE_MANIFEST).unwrap();
    fs::write(src.join("conf/nginx.conf"), fixtures::NGINX_PAYLOAD).unwrap();
    fs::write(src.join("conf/collectd.conf"), fixtures::COLLECTD_PAYLOAD).unwrap();
    fs::write(src.join("scripts/gulp/index.js"), "module.exports = {};\n").unwrap();
    fs::write(src.join("h/static/scripts/app.js"), fixtures::ASSET_ENTRY).unwrap();

    let config_path = base.join("provision.toml");
    fs::write(
        &config_path,
        format!(
            r#"[source]
root = "{}"
"#,
            src.display()
        ),
    )
    .unwrap();
    config_path
}

/// Path of the built binary under test.
pub fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_hyp-provision")
}
