//! Asset build step
//!
//! Invokes the front-end build toolchain (installed by the dependency
//! step) against the full source tree. The artifact set lands in the
//! static directory created by the layout step. Failure is fatal; a
//! partial asset directory is never considered valid.

use crate::config::Config;
use crate::context::BuildContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::report::ProvisionReceipt;
use crate::system::System;

const STEP: &str = "assets";

pub fn build(
    sys: &dyn System,
    ctx: &BuildContext,
    config: &Config,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    let static_dir = ctx.under_root(&config.build.static_dir);

    sys.run_command(&config.build.program, &config.build.args, &ctx.root)
        .map_err(|err| ProvisionError::BuildToolchain {
            reason: err.to_string(),
        })?;

    receipt.record(
        STEP,
        format!(
            "built static assets into {} ({} {})",
            static_dir.display(),
            config.build.program,
            config.build.args.join(" ")
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionIdentity;
    use crate::system::MockSystem;
    use std::path::PathBuf;

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
    fn test_runs_toolchain_in_application_root() {
        let sys = MockSystem::new();
        let mut receipt = ProvisionReceipt::new(false);

        build(&sys, &test_ctx(), &Config::default(), &mut receipt).unwrap();

        assert_eq!(
            sys.ops(),
            vec!["run:node_modules/.bin/gulp:build:/var/lib/hypothesis".to_string()]
        );
        assert!(receipt.actions[0]
            .description
            .contains("/var/lib/hypothesis/build"));
    }

    #[test]
    fn test_toolchain_failure_is_fatal() {
        let sys = MockSystem::new();
        sys.fail_program("node_modules/.bin/gulp");
        let mut receipt = ProvisionReceipt::new(false);

        let err = build(&sys, &test_ctx(), &Config::default(), &mut receipt).unwrap_err();
        assert!(matches!(err, ProvisionError::BuildToolchain { .. }));
        assert!(receipt.actions.is_empty());
    }
}
