//! Directory layout step
//!
//! Creates the fixed set of working directories with ownership assigned to
//! the unprivileged identity at creation time. Directories that pre-exist
//! with different default ownership (typically the service packages' own
//! state and config paths) get their ownership changed recursively instead.
//!
//! Also provides the final ownership reconciliation pass the pipeline runs
//! over the application root once all content is in place.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::context::BuildContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::models::ExecutionIdentity;
use crate::report::ProvisionReceipt;
use crate::steps::deps;
use crate::system::{SysError, System};

const STEP: &str = "layout";

/// Outcome of [`ensure_owned_dir`], so callers can phrase their receipt
/// entries per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirOutcome {
    /// Directory was created (with parents) and owned
    Created,
    /// Directory already existed; ownership re-applied recursively
    Reowned,
}

/// Create a directory owned by the identity, or recursively re-own it if
/// it already exists.
pub(crate) fn ensure_owned_dir(
    sys: &dyn System,
    path: &Path,
    identity: &ExecutionIdentity,
) -> Result<DirOutcome, SysError> {
    if sys.dir_exists(path) {
        sys.chown_recursive(path, identity.uid, identity.gid)?;
        return Ok(DirOutcome::Reowned);
    }
    sys.create_dir_all(path)?;
    sys.chown(path, identity.uid, identity.gid)?;
    Ok(DirOutcome::Created)
}

/// Build the fixed directory layout. Must run strictly after the identity
/// step; every node is owned by the identity before any content lands in it.
pub fn build(
    sys: &dyn System,
    ctx: &BuildContext,
    config: &Config,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    let mut nodes: Vec<PathBuf> = Vec::new();

    // Application root first; everything else nests under it or assumes it
    nodes.push(ctx.root.clone());
    nodes.push(ctx.under_root(&config.build.static_dir));
    nodes.push(ctx.root.join(deps::STAMP_DIR));

    // Parents of staged build scaffolding
    for dep in [&config.deps.python, &config.deps.node] {
        for scaffold in &dep.scaffolding {
            if let Some(parent) = scaffold.parent() {
                if !parent.as_os_str().is_empty() {
                    nodes.push(ctx.under_root(parent));
                }
            }
        }
    }

    // Service config directories
    for service in [&config.services.nginx, &config.services.collectd] {
        if let Some(parent) = service.destination.parent() {
            nodes.push(parent.to_path_buf());
        }
    }

    let mut seen: HashSet<PathBuf> = HashSet::new();
    for node in nodes {
        if !seen.insert(node.clone()) {
            continue;
        }
        let outcome = ensure_owned_dir(sys, &node, &ctx.identity).map_err(|err| {
            ProvisionError::DirectoryProvision {
                path: node.clone(),
                reason: err.to_string(),
            }
        })?;
        match outcome {
            DirOutcome::Created => {
                receipt.dirs_created += 1;
                receipt.record(
                    STEP,
                    format!(
                        "created directory {} ({})",
                        node.display(),
                        ctx.identity.display_owner()
                    ),
                );
            }
            DirOutcome::Reowned => {
                receipt.dirs_existing += 1;
                receipt.record(
                    STEP,
                    format!(
                        "re-owned existing directory {} to {} (recursive)",
                        node.display(),
                        ctx.identity.display_owner()
                    ),
                );
            }
        }
    }

    Ok(())
}

/// Recursive ownership pass over the application root, run after all
/// content (source tree, installed packages, built assets) is in place and
/// before finalization. Fatal on failure, unlike the best-effort
/// version-control fix in the finalize step.
pub fn reconcile_ownership(
    sys: &dyn System,
    ctx: &BuildContext,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    sys.chown_recursive(&ctx.root, ctx.identity.uid, ctx.identity.gid)
        .map_err(|err| ProvisionError::DirectoryProvision {
            path: ctx.root.clone(),
            reason: err.to_string(),
        })?;
    receipt.record(
        STEP,
        format!(
            "applied recursive ownership {} to {}",
            ctx.identity.display_owner(),
            ctx.root.display()
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MockSystem;

    fn test_ctx() -> BuildContext {
        let identity = ExecutionIdentity {
            user: "hypothesis".to_string(),
            group: "hypothesis".to_string(),
            home: PathBuf::from("/var/lib/hypothesis"),
            uid: 999,
            gid: 999,
        };
        BuildContext::new(identity, &Config::default())
    }

    #[test]
    fn test_creates_layout_with_ownership() {
        let sys = MockSystem::new();
        let mut receipt = ProvisionReceipt::new(false);
        let ctx = test_ctx();

        build(&sys, &ctx, &Config::default(), &mut receipt).unwrap();

        for path in [
            "/var/lib/hypothesis",
            "/var/lib/hypothesis/build",
            "/var/lib/hypothesis/.provision",
            "/var/lib/hypothesis/scripts",
            "/etc/nginx",
            "/etc/collectd",
        ] {
            assert_eq!(
                sys.owner_of(Path::new(path)),
                Some((999, 999)),
                "wrong owner for {path}"
            );
        }
    }

    #[test]
    fn test_preexisting_dir_is_reowned_recursively() {
        let sys = MockSystem::new();
        // Simulate the service package owning its config dir already
        sys.add_dir(Path::new("/etc/nginx"));
        sys.add_dir(Path::new("/etc/nginx/conf.d"));
        let mut receipt = ProvisionReceipt::new(false);
        let ctx = test_ctx();

        build(&sys, &ctx, &Config::default(), &mut receipt).unwrap();

        assert!(sys.ops().contains(&"chown-r:/etc/nginx".to_string()));
        assert_eq!(sys.owner_of(Path::new("/etc/nginx/conf.d")), Some((999, 999)));
        assert!(receipt
            .actions
            .iter()
            .any(|a| a.description.contains("re-owned existing directory /etc/nginx")));
    }

    #[test]
    fn test_chown_failure_is_directory_provision_error() {
        let sys = MockSystem::new();
        sys.fail_chown_under(Path::new("/etc/collectd"));
        sys.add_dir(Path::new("/etc/collectd"));
        let mut receipt = ProvisionReceipt::new(false);
        let ctx = test_ctx();

        let err = build(&sys, &ctx, &Config::default(), &mut receipt).unwrap_err();
        assert!(matches!(err, ProvisionError::DirectoryProvision { .. }));
    }

    #[test]
    fn test_reconcile_ownership_covers_root() {
        let sys = MockSystem::new();
        sys.add_dir(Path::new("/var/lib/hypothesis"));
        sys.add_source_file(
            Path::new("/var/lib/hypothesis/app.py"),
            b"print('hi')",
        );
        let mut receipt = ProvisionReceipt::new(false);
        let ctx = test_ctx();

        reconcile_ownership(&sys, &ctx, &mut receipt).unwrap();

        assert_eq!(
            sys.owner_of(Path::new("/var/lib/hypothesis/app.py")),
            Some((999, 999))
        );
    }
}
