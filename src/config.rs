//! Configuration module for hyp-provision
//!
//! Implements the configuration hierarchy:
//! 1. CLI flags (highest priority)
//! 2. Environment variables (HYP_PROVISION_*)
//! 3. Provision config (provision.toml)
//! 4. Built-in defaults (lowest priority)
//!
//! Every key has a built-in default matching the hypothesis container
//! layout, so an empty file (or no file at all) is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};

/// Deployment mode exported to the handed-off process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    #[default]
    Production,
    Development,
}

impl DeployMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployMode::Production => "production",
            DeployMode::Development => "development",
        }
    }
}

/// Unprivileged identity the application runs under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_name")]
    pub user: String,

    #[serde(default = "default_identity_name")]
    pub group: String,

    /// Home directory; doubles as the application root
    #[serde(default = "default_home")]
    pub home: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user: default_identity_name(),
            group: default_identity_name(),
            home: default_home(),
        }
    }
}

fn default_identity_name() -> String {
    "hypothesis".to_string()
}

fn default_home() -> PathBuf {
    PathBuf::from("/var/lib/hypothesis")
}

/// Where the application source tree is provisioned from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_root")]
    pub root: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: default_source_root(),
        }
    }
}

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

/// Runtime parameters recorded for the handed-off process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: DeployMode,

    /// Port reserved for the application listener. Declared only; no
    /// protocol behavior lives in this tool.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: DeployMode::default(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_port() -> u16 {
    5000
}

/// One of the two disjoint dependency sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Manifest path, relative to the source root
    pub manifest: PathBuf,

    /// Extra files or directories (relative to the source root) that must
    /// be staged alongside the manifest for the first-phase install to
    /// succeed, e.g. build scripts referenced by install hooks.
    #[serde(default)]
    pub scaffolding: Vec<PathBuf>,

    /// Installer executable
    pub program: String,

    /// Installer arguments; the manifest is referenced by these, the tool
    /// never parses it
    #[serde(default)]
    pub args: Vec<String>,
}

/// Both dependency sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepsConfig {
    #[serde(default = "default_python_deps")]
    pub python: DependencyConfig,

    #[serde(default = "default_node_deps")]
    pub node: DependencyConfig,
}

impl Default for DepsConfig {
    fn default() -> Self {
        Self {
            python: default_python_deps(),
            node: default_node_deps(),
        }
    }
}

fn default_python_deps() -> DependencyConfig {
    DependencyConfig {
        manifest: PathBuf::from("requirements.txt"),
        scaffolding: Vec::new(),
        program: "pip".to_string(),
        args: vec![
            "install".to_string(),
            "--no-cache-dir".to_string(),
            "-r".to_string(),
            "requirements.txt".to_string(),
        ],
    }
}

fn default_node_deps() -> DependencyConfig {
    DependencyConfig {
        manifest: PathBuf::from("package.json"),
        scaffolding: vec![PathBuf::from("scripts/gulp")],
        program: "npm".to_string(),
        args: vec!["install".to_string(), "--production".to_string()],
    }
}

/// An auxiliary system service configured by copying an opaque payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Configuration payload, relative to the source root. Copied
    /// verbatim; the contents are never interpreted.
    pub payload: PathBuf,

    /// Absolute destination the service expects
    pub destination: PathBuf,

    /// State/log/temp directories the application process must observe as
    /// writable under its own identity at runtime
    #[serde(default)]
    pub runtime_dirs: Vec<PathBuf>,
}

/// The two auxiliary services: reverse proxy and metrics collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_nginx_service")]
    pub nginx: ServiceConfig,

    #[serde(default = "default_collectd_service")]
    pub collectd: ServiceConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            nginx: default_nginx_service(),
            collectd: default_collectd_service(),
        }
    }
}

fn default_nginx_service() -> ServiceConfig {
    ServiceConfig {
        payload: PathBuf::from("conf/nginx.conf"),
        destination: PathBuf::from("/etc/nginx/nginx.conf"),
        runtime_dirs: vec![
            PathBuf::from("/var/log/nginx"),
            PathBuf::from("/var/lib/nginx"),
            PathBuf::from("/run/nginx"),
        ],
    }
}

fn default_collectd_service() -> ServiceConfig {
    ServiceConfig {
        payload: PathBuf::from("conf/collectd.conf"),
        destination: PathBuf::from("/etc/collectd/collectd.conf"),
        runtime_dirs: vec![
            PathBuf::from("/etc/collectd/collectd.conf.d"),
            PathBuf::from("/var/lib/collectd"),
            PathBuf::from("/var/log/collectd"),
        ],
    }
}

/// Front-end asset build invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_program")]
    pub program: String,

    #[serde(default = "default_build_args")]
    pub args: Vec<String>,

    /// Static asset output directory, relative to the application root
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Executable directory prepended to the runtime search path,
    /// relative to the application root
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: default_build_program(),
            args: default_build_args(),
            static_dir: default_static_dir(),
            bin_dir: default_bin_dir(),
        }
    }
}

fn default_build_program() -> String {
    "node_modules/.bin/gulp".to_string()
}

fn default_build_args() -> Vec<String> {
    vec!["build".to_string()]
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("bin")
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub deps: DepsConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| ProvisionError::Config {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(config.with_env_overrides())
    }

    /// Load from an explicit path, from `provision.toml` in the current
    /// directory, or fall back to built-in defaults.
    ///
    /// An explicit path that fails to load is a hard error; the implicit
    /// fallback only applies when no path was given.
    pub fn load_or_default(explicit: Option<&Path>) -> ProvisionResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let fallback = Path::new("provision.toml");
        if fallback.exists() {
            return Self::load(fallback);
        }

        Ok(Self::default().with_env_overrides())
    }

    /// Apply environment variable overrides (HYP_PROVISION_* prefix)
    pub fn with_env_overrides(mut self) -> Self {
        // HYP_PROVISION_MODE
        if let Ok(mode) = std::env::var("HYP_PROVISION_MODE") {
            self.runtime.mode = match mode.to_lowercase().as_str() {
                "development" => DeployMode::Development,
                _ => DeployMode::Production,
            };
        }

        // HYP_PROVISION_SOURCE
        if let Ok(root) = std::env::var("HYP_PROVISION_SOURCE") {
            if !root.trim().is_empty() {
                self.source.root = PathBuf::from(root);
            }
        }

        self
    }
}
