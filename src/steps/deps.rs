//! Dependency installation step
//!
//! Installs the two disjoint dependency sets (interpreted-runtime packages
//! and the compiled-asset build toolchain) in two phases:
//!
//! 1. Stage only the manifests and minimal build scaffolding into the
//!    application root, then install each set there. This phase is cached:
//!    a stamp file keyed by the manifest's content hash marks a completed
//!    install, so source-only changes never re-trigger resolution.
//! 2. Copy the full source tree, then run each installer again as a
//!    completion pass. This pass also triggers any install-time hooks the
//!    manifests declare and always runs.
//!
//! The two sets have no cross-dependency, so their first-phase installs run
//! on scoped threads and are joined before anything consumes them.

use std::path::PathBuf;
use std::thread;

use sha2::{Digest, Sha256};

use crate::config::{Config, DependencyConfig};
use crate::context::BuildContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::models::DependencyKind;
use crate::report::{Action, ProvisionReceipt};
use crate::system::System;

const STEP: &str = "deps";

/// Directory under the application root holding install cache stamps
pub(crate) const STAMP_DIR: &str = ".provision";

/// Content-derived cache key for a dependency manifest.
pub fn manifest_cache_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

fn stamp_path(ctx: &BuildContext, kind: DependencyKind) -> PathBuf {
    ctx.root.join(STAMP_DIR).join(format!("{kind}.stamp"))
}

/// Run both dependency installs, staged phase first, completion phase after
/// the full source copy. Both phases of both sets must succeed before the
/// asset build may run.
pub fn install(
    sys: &dyn System,
    ctx: &BuildContext,
    config: &Config,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    let sets = [
        (DependencyKind::Python, &config.deps.python),
        (DependencyKind::Node, &config.deps.node),
    ];

    // Manifests and scaffolding land before any other source content
    for (kind, dep) in sets {
        stage(sys, ctx, config, kind, dep, receipt)?;
    }

    // First-phase installs, joined before the source copy below
    let outcomes = thread::scope(|scope| {
        let handles =
            sets.map(|(kind, dep)| scope.spawn(move || install_staged(sys, ctx, kind, dep)));
        handles.map(|handle| handle.join().expect("install thread panicked"))
    });
    for outcome in outcomes {
        receipt.actions.extend(outcome?);
    }

    // Full source tree; source-only edits reach the image here, after the
    // cached layer
    copy_source(sys, ctx, config, receipt)?;

    // Completion pass over the full tree; runs install-time hooks
    for (kind, dep) in sets {
        run_installer(sys, ctx, kind, dep)?;
        receipt.record(
            STEP,
            format!(
                "verified {kind} set against full source tree ({} {})",
                dep.program,
                dep.args.join(" ")
            ),
        );
    }

    Ok(())
}

fn stage(
    sys: &dyn System,
    ctx: &BuildContext,
    config: &Config,
    kind: DependencyKind,
    dep: &DependencyConfig,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    let source_manifest = config.source.root.join(&dep.manifest);
    let staged = ctx.under_root(&dep.manifest);
    sys.copy_file(&source_manifest, &staged).map_err(|err| {
        ProvisionError::DependencyResolution {
            set: kind.as_str().to_string(),
            manifest: dep.manifest.clone(),
            reason: format!(
                "cannot stage manifest from {}: {err}",
                source_manifest.display()
            ),
        }
    })?;
    receipt.record(
        STEP,
        format!("staged {kind} manifest {}", dep.manifest.display()),
    );

    for scaffold in &dep.scaffolding {
        let from = config.source.root.join(scaffold);
        let to = ctx.under_root(scaffold);
        let copied = if sys.dir_exists(&from) {
            sys.copy_tree(&from, &to).map(|()| true)
        } else if sys.file_exists(&from) {
            sys.copy_file(&from, &to).map(|()| true)
        } else {
            Ok(false)
        };
        match copied {
            Ok(true) => receipt.record(
                STEP,
                format!("staged build scaffolding {}", scaffold.display()),
            ),
            Ok(false) => receipt.record_skipped(
                STEP,
                format!(
                    "build scaffolding {} not present in source tree",
                    scaffold.display()
                ),
            ),
            Err(err) => {
                return Err(ProvisionError::DependencyResolution {
                    set: kind.as_str().to_string(),
                    manifest: dep.manifest.clone(),
                    reason: format!("cannot stage scaffolding {}: {err}", scaffold.display()),
                })
            }
        }
    }

    Ok(())
}

/// First-phase install against the staged copy. Skipped entirely when the
/// stamp from a previous run matches the manifest's content hash.
fn install_staged(
    sys: &dyn System,
    ctx: &BuildContext,
    kind: DependencyKind,
    dep: &DependencyConfig,
) -> ProvisionResult<Vec<Action>> {
    let staged_manifest = ctx.under_root(&dep.manifest);
    let key = sys
        .read_file(&staged_manifest)
        .ok()
        .map(|bytes| manifest_cache_key(&bytes));
    let stamp = stamp_path(ctx, kind);

    if let Some(key) = &key {
        if let Ok(existing) = sys.read_file(&stamp) {
            if existing == key.as_bytes() {
                return Ok(vec![Action {
                    step: STEP,
                    description: format!("{kind} set unchanged ({key}); cached install reused"),
                    skipped: true,
                }]);
            }
        }
    }

    run_installer(sys, ctx, kind, dep)?;

    let mut actions = vec![Action {
        step: STEP,
        description: format!(
            "installed {kind} set from {} ({} {})",
            dep.manifest.display(),
            dep.program,
            dep.args.join(" ")
        ),
        skipped: false,
    }];

    if let Some(key) = key {
        sys.write_file(&stamp, key.as_bytes()).map_err(|err| {
            ProvisionError::DependencyResolution {
                set: kind.as_str().to_string(),
                manifest: dep.manifest.clone(),
                reason: format!("cannot record cache stamp: {err}"),
            }
        })?;
        actions.push(Action {
            step: STEP,
            description: format!("recorded {kind} cache stamp ({key})"),
            skipped: false,
        });
    }

    Ok(actions)
}

fn copy_source(
    sys: &dyn System,
    ctx: &BuildContext,
    config: &Config,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    sys.copy_tree(&config.source.root, &ctx.root).map_err(|err| {
        ProvisionError::DirectoryProvision {
            path: ctx.root.clone(),
            reason: format!(
                "cannot copy source tree from {}: {err}",
                config.source.root.display()
            ),
        }
    })?;
    receipt.record(
        STEP,
        format!(
            "copied full source tree from {}",
            config.source.root.display()
        ),
    );
    Ok(())
}

fn run_installer(
    sys: &dyn System,
    ctx: &BuildContext,
    kind: DependencyKind,
    dep: &DependencyConfig,
) -> ProvisionResult<()> {
    sys.run_command(&dep.program, &dep.args, &ctx.root)
        .map_err(|err| ProvisionError::DependencyResolution {
            set: kind.as_str().to_string(),
            manifest: dep.manifest.clone(),
            reason: err.to_string(),
        })
}
