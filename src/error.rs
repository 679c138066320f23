//! Error types for hyp-provision
//!
//! Uses `thiserror` for library errors. Every variant except `Io` maps to one
//! fatal failure category of the provisioning sequence; the orchestrator
//! short-circuits on the first error and never retries.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for provisioning operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Group or user creation failed
    #[error("identity provisioning failed for '{name}': {reason}")]
    IdentityProvision { name: String, reason: String },

    /// Directory creation or ownership change failed
    #[error("directory provisioning failed at {path}: {reason}")]
    DirectoryProvision { path: PathBuf, reason: String },

    /// A manifest entry could not be resolved or installed
    #[error("dependency resolution failed for {set} set ({manifest}): {reason}")]
    DependencyResolution {
        set: String,
        manifest: PathBuf,
        reason: String,
    },

    /// Front-end asset compilation failed
    #[error("asset build failed: {reason}")]
    BuildToolchain { reason: String },

    /// A service configuration payload could not be placed or its
    /// directories could not be made writable
    #[error("configuration copy from {source_path} to {destination} failed: {reason}")]
    ConfigurationCopy {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    /// Switching to the unprivileged identity failed
    #[error("privilege drop failed: {reason}")]
    PrivilegeDrop { reason: String },

    /// Another provisioning run holds the build lock
    #[error("another provisioning run holds the lock at {path}")]
    LockHeld { path: PathBuf },

    /// Invalid configuration file
    #[error("invalid configuration in {file}: {message}")]
    Config { file: PathBuf, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
