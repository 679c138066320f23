//! Test fixtures - reusable content constants for tests.

/// A realistic interpreted-runtime manifest
pub const PYTHON_MANIFEST: &str = "pyramid==1.6\ngnsq==0.3.1\nPyJWT==1.4.0\n";

/// A realistic build-toolchain manifest
pub const NODE_MANIFEST: &str = r#"{
  "name": "h",
  "private": true,
  "dependencies": {
    "gulp": "^3.9.0"
  }
}
"#;

/// Reverse-proxy configuration payload (opaque to the tool)
pub const NGINX_PAYLOAD: &str = "daemon off;\nworker_processes 2;\n";

/// Metrics-collector configuration payload (opaque to the tool)
pub const COLLECTD_PAYLOAD: &str = "Interval 10\nLoadPlugin nginx\n";

/// A single front-end entry point
pub const ASSET_ENTRY: &str = "console.log('boot');\n";
