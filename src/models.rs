//! Core data models for hyp-provision
//!
//! Defines the value types threaded through the provisioning sequence:
//! - `ExecutionIdentity`: the resolved unprivileged user/group the
//!   application ultimately runs as
//! - `DependencyKind`: which of the two disjoint dependency sets an
//!   install operation belongs to

use std::path::PathBuf;

use serde::Serialize;

/// The system-level identity the application runs under after the
/// privilege drop.
///
/// Exactly one unprivileged identity exists per build. It is resolved by
/// the identity step before any directory under its home is populated and
/// never destroyed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionIdentity {
    /// Account name, e.g. `hypothesis`
    pub user: String,
    /// Primary group name, e.g. `hypothesis`
    pub group: String,
    /// Home directory, doubles as the application root
    pub home: PathBuf,
    /// Resolved numeric user id
    pub uid: u32,
    /// Resolved numeric group id
    pub gid: u32,
}

impl ExecutionIdentity {
    /// `user:group` form used in ownership diagnostics
    pub fn display_owner(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }
}

/// Which dependency set an install operation targets.
///
/// The two sets are disjoint by design: the interpreted-runtime packages
/// and the compiled-asset build toolchain have no cross-dependency, so
/// their first-phase installs may run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Interpreted-runtime packages (pip / requirements.txt)
    Python,
    /// Compiled-asset build toolchain (npm / package.json)
    Node,
}

impl DependencyKind {
    /// Stable lowercase name used in stamp files and diagnostics
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyKind::Python => "python",
            DependencyKind::Node => "node",
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
