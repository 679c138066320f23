//! Provisioning pipeline
//!
//! Orchestrates the provisioning flow:
//! 1. Ensure the unprivileged identity exists
//! 2. Build the directory layout with ownership set at creation
//! 3. Install both dependency sets (staged phase, source copy, completion)
//! 4. Build the front-end assets
//! 5. Install service configuration payloads
//! 6. Reconcile ownership over the application root
//! 7. Export the environment and drop privileges
//!
//! Pure orchestration: every step returns `ProvisionResult` and the
//! pipeline short-circuits on the first failure. No retries, no rollback:
//! a failed build is discarded and rerun from the start, which every step
//! tolerates by being idempotent.

use crate::config::Config;
use crate::context::BuildContext;
use crate::error::ProvisionResult;
use crate::report::ProvisionReceipt;
use crate::steps::{assets, deps, finalize, identity, layout, services};
use crate::system::System;

/// The ordered provisioning sequence over a system backend.
pub struct ProvisionPipeline<'a> {
    sys: &'a dyn System,
    config: &'a Config,
}

impl<'a> ProvisionPipeline<'a> {
    pub fn new(sys: &'a dyn System, config: &'a Config) -> Self {
        Self { sys, config }
    }

    /// Run every step in order. The receipt accumulates actions even when
    /// a step fails, so callers can show what completed before the abort.
    pub fn run(&self, receipt: &mut ProvisionReceipt) -> ProvisionResult<BuildContext> {
        // Step 1: identity exists before anything under its home is populated
        let identity = identity::ensure(self.sys, &self.config.identity, receipt)?;
        let mut ctx = BuildContext::new(identity, self.config);

        // Step 2: directory layout, ownership assigned at creation
        layout::build(self.sys, &ctx, self.config, receipt)?;

        // Step 3: staged dependency installs, then the full source copy,
        // then the completion pass. Both sets complete before step 4.
        deps::install(self.sys, &ctx, self.config, receipt)?;

        // Step 4: front-end assets from the full tree
        assets::build(self.sys, &ctx, self.config, receipt)?;

        // Step 5: service payloads and their runtime directories
        services::configure(self.sys, &ctx, self.config, receipt)?;

        // Step 6: everything under the root now belongs to the identity
        layout::reconcile_ownership(self.sys, &ctx, receipt)?;

        // Step 7: environment, best-effort metadata fix, privilege drop
        finalize::run(self.sys, &mut ctx, self.config, receipt)?;

        receipt.env = ctx.env.clone();
        receipt.listen_port = Some(ctx.listen_port);
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use crate::system::{MockSystem, PlanSystem};
    use std::path::{Path, PathBuf};

    const SOURCE_ROOT: &str = "/src/h";

    fn test_config() -> Config {
        let mut config = Config::default();
        config.source.root = PathBuf::from(SOURCE_ROOT);
        config
    }

    fn seeded_mock() -> MockSystem {
        let sys = MockSystem::new();
        sys.add_dir(Path::new(SOURCE_ROOT));
        sys.add_source_file(Path::new("/src/h/requirements.txt"), b"pyramid==1.6\n");
        sys.add_source_file(Path::new("/src/h/package.json"), b"{\"name\":\"h\"}");
        sys.add_source_file(Path::new("/src/h/conf/nginx.conf"), b"daemon off;");
        sys.add_source_file(Path::new("/src/h/conf/collectd.conf"), b"Interval 10");
        sys.add_source_file(Path::new("/src/h/h/app.py"), b"def main(): pass\n");
        sys
    }

    #[test]
    fn test_full_run_sequences_steps_in_order() {
        let sys = seeded_mock();
        let config = test_config();
        let mut receipt = ProvisionReceipt::new(false);

        let ctx = ProvisionPipeline::new(&sys, &config)
            .run(&mut receipt)
            .unwrap();

        assert_eq!(ctx.identity.user, "hypothesis");
        let ops = sys.ops();

        let user_idx = ops.iter().position(|op| op == "useradd:hypothesis").unwrap();
        let static_mkdir = ops
            .iter()
            .position(|op| op == "mkdir:/var/lib/hypothesis/build")
            .unwrap();
        let gulp_idx = ops
            .iter()
            .position(|op| op.starts_with("run:node_modules/.bin/gulp"))
            .unwrap();
        let reconcile_idx = ops
            .iter()
            .rposition(|op| op == "chown-r:/var/lib/hypothesis")
            .unwrap();
        let drop_idx = ops.iter().position(|op| op == "drop:999:999").unwrap();

        assert!(user_idx < static_mkdir, "identity before layout");
        assert!(static_mkdir < gulp_idx, "layout before asset build");
        assert!(gulp_idx < reconcile_idx, "assets before reconciliation");
        assert!(reconcile_idx < drop_idx, "reconciliation before drop");

        // The drop is the final system mutation
        assert_eq!(ops.last().unwrap(), "drop:999:999");

        // Receipt carries the exported environment and the reserved port
        assert_eq!(receipt.listen_port, Some(5000));
        assert_eq!(
            receipt.env.get("PYTHONPATH"),
            Some(&"/var/lib/hypothesis".to_string())
        );
    }

    #[test]
    fn test_dependency_failure_prevents_asset_build() {
        let sys = seeded_mock();
        sys.fail_program("pip");
        let config = test_config();
        let mut receipt = ProvisionReceipt::new(false);

        let err = ProvisionPipeline::new(&sys, &config)
            .run(&mut receipt)
            .unwrap_err();

        assert!(matches!(err, ProvisionError::DependencyResolution { .. }));
        let ops = sys.ops();
        assert!(
            !ops.iter().any(|op| op.starts_with("run:node_modules")),
            "asset build must not run after a resolution failure"
        );
        assert!(sys.dropped_to().is_none(), "privileges must not drop on failure");
    }

    #[test]
    fn test_rerun_converges_to_same_state() {
        let sys = seeded_mock();
        let config = test_config();

        let mut first = ProvisionReceipt::new(false);
        ProvisionPipeline::new(&sys, &config)
            .run(&mut first)
            .unwrap();
        let owner_home_first = sys.owner_of(Path::new("/var/lib/hypothesis"));
        let account_ops_first = sys
            .ops()
            .iter()
            .filter(|op| op.starts_with("useradd") || op.starts_with("groupadd"))
            .count();

        let mut second = ProvisionReceipt::new(false);
        ProvisionPipeline::new(&sys, &config)
            .run(&mut second)
            .unwrap();

        // No new accounts, same ownership, cached install reused
        let account_ops_second = sys
            .ops()
            .iter()
            .filter(|op| op.starts_with("useradd") || op.starts_with("groupadd"))
            .count();
        assert_eq!(account_ops_first, account_ops_second);
        assert_eq!(sys.owner_of(Path::new("/var/lib/hypothesis")), owner_home_first);
        assert!(second
            .actions
            .iter()
            .any(|a| a.skipped && a.description.contains("cached install reused")));
        assert_eq!(second.env, first.env);
    }

    #[test]
    fn test_plan_backend_produces_deterministic_receipt() {
        let sys = PlanSystem::new();
        let config = test_config();

        let mut first = ProvisionReceipt::new(true);
        ProvisionPipeline::new(&sys, &config)
            .run(&mut first)
            .unwrap();

        let mut second = ProvisionReceipt::new(true);
        ProvisionPipeline::new(&sys, &config)
            .run(&mut second)
            .unwrap();

        assert_eq!(first.to_json(), second.to_json());
        assert!(first
            .actions
            .iter()
            .any(|a| a.description.contains("created system user 'hypothesis'")));
    }
}
