//! Post-build verification
//!
//! Read-only invariant checks over a provisioned environment:
//!
//! - the unprivileged identity exists;
//! - every node under the application root and under each service's
//!   runtime directories is owned by that identity;
//! - both dependency cache stamps are present;
//! - the built artifact set is non-empty.
//!
//! Runs directly against the host (it never mutates anything) and needs
//! no privileges. Each failed invariant becomes a `Violation`; an empty
//! list means the environment matches what a successful run produces.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::unistd::{Group, User};
use serde::Serialize;

use crate::config::Config;
use crate::models::DependencyKind;
use crate::steps::deps::STAMP_DIR;

/// A failed post-build invariant.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// Stable tag for the invariant that failed
    pub invariant: &'static str,
    /// Human-readable detail
    pub detail: String,
}

fn violation(invariant: &'static str, detail: impl Into<String>) -> Violation {
    Violation {
        invariant,
        detail: detail.into(),
    }
}

/// Check every post-build invariant. Read-only.
pub fn verify_environment(config: &Config) -> Vec<Violation> {
    let mut violations = Vec::new();

    let user = match User::from_name(&config.identity.user) {
        Ok(Some(user)) => user,
        Ok(None) => {
            violations.push(violation(
                "identity-exists",
                format!("system user '{}' does not exist", config.identity.user),
            ));
            return violations;
        }
        Err(err) => {
            violations.push(violation(
                "identity-exists",
                format!("cannot resolve user '{}': {err}", config.identity.user),
            ));
            return violations;
        }
    };
    let group = match Group::from_name(&config.identity.group) {
        Ok(Some(group)) => group,
        Ok(None) => {
            violations.push(violation(
                "identity-exists",
                format!("system group '{}' does not exist", config.identity.group),
            ));
            return violations;
        }
        Err(err) => {
            violations.push(violation(
                "identity-exists",
                format!("cannot resolve group '{}': {err}", config.identity.group),
            ));
            return violations;
        }
    };
    let uid = user.uid.as_raw();
    let gid = group.gid.as_raw();

    let home = &config.identity.home;
    check_tree_ownership(home, uid, gid, &config.identity.user, &mut violations);
    for service in [&config.services.nginx, &config.services.collectd] {
        for dir in &service.runtime_dirs {
            check_tree_ownership(dir, uid, gid, &config.identity.user, &mut violations);
        }
    }

    for kind in [DependencyKind::Python, DependencyKind::Node] {
        let stamp = home.join(STAMP_DIR).join(format!("{kind}.stamp"));
        if !stamp.is_file() {
            violations.push(violation(
                "dependency-cache-stamp",
                format!("missing {} install stamp at {}", kind, stamp.display()),
            ));
        }
    }

    let static_dir = home.join(&config.build.static_dir);
    match fs::read_dir(&static_dir) {
        Ok(mut entries) => {
            if entries.next().is_none() {
                violations.push(violation(
                    "artifact-set",
                    format!("static asset directory {} is empty", static_dir.display()),
                ));
            }
        }
        Err(err) => {
            violations.push(violation(
                "artifact-set",
                format!(
                    "static asset directory {} unreadable: {err}",
                    static_dir.display()
                ),
            ));
        }
    }

    violations
}

/// Walk a tree and report ownership mismatches as one violation carrying
/// the mismatch count and a first example.
fn check_tree_ownership(
    root: &Path,
    uid: u32,
    gid: u32,
    owner_name: &str,
    violations: &mut Vec<Violation>,
) {
    if fs::symlink_metadata(root).is_err() {
        violations.push(violation(
            "directory-present",
            format!("{} does not exist", root.display()),
        ));
        return;
    }

    let mut mismatches: usize = 0;
    let mut first_example: Option<String> = None;
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        let meta = match fs::symlink_metadata(&current) {
            Ok(meta) => meta,
            Err(err) => {
                violations.push(violation(
                    "ownership",
                    format!("cannot stat {}: {err}", current.display()),
                ));
                continue;
            }
        };
        if meta.uid() != uid || meta.gid() != gid {
            mismatches += 1;
            if first_example.is_none() {
                first_example = Some(format!(
                    "{} is owned by {}:{}",
                    current.display(),
                    meta.uid(),
                    meta.gid()
                ));
            }
        }
        if meta.is_dir() {
            if let Ok(entries) = fs::read_dir(&current) {
                for entry in entries.flatten() {
                    stack.push(entry.path());
                }
            }
        }
    }

    if mismatches > 0 {
        violations.push(violation(
            "ownership",
            format!(
                "{} nodes under {} are not owned by {} (e.g. {})",
                mismatches,
                root.display(),
                owner_name,
                first_example.unwrap_or_default()
            ),
        ));
    }
}
