//! Finalization step
//!
//! Last step of the sequence, in three parts:
//!
//! (a) exports the process-wide environment the handed-off process needs:
//!     the application bin directory prepended to the search path, forced
//!     UTF-8 text encoding, the application root prepended to the module
//!     search path, and the deployment-mode flag;
//! (b) attempts a recursive ownership fix over version-control metadata if
//!     present; best effort: the outcome is recorded on the receipt and
//!     never aborts the run;
//! (c) irrevocably drops privileges to the unprivileged identity.
//!
//! Nothing after (c) may require privileges; a later step needing them is
//! a build-time design error, not a runtime condition to handle.

use crate::config::Config;
use crate::context::BuildContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::report::ProvisionReceipt;
use crate::system::{SysError, System};

const STEP: &str = "finalize";

/// Environment variable forcing UTF-8 text encoding in the runtime
const ENCODING_VAR: &str = "PYTHONIOENCODING";
const ENCODING_VALUE: &str = "utf_8";

/// Module search path variable for the interpreted runtime
const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// Deployment-mode flag consumed by the application and the asset toolchain
const MODE_VAR: &str = "NODE_ENV";

pub fn run(
    sys: &dyn System,
    ctx: &mut BuildContext,
    config: &Config,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    // (a) process-wide environment
    let bin_dir = ctx.under_root(&config.build.bin_dir);
    let path_value = prepend_path(&bin_dir.display().to_string(), sys.env_var("PATH"));
    export(sys, ctx, receipt, "PATH", path_value);
    export(sys, ctx, receipt, ENCODING_VAR, ENCODING_VALUE.to_string());
    let module_path = prepend_path(&ctx.root.display().to_string(), sys.env_var(MODULE_PATH_VAR));
    export(sys, ctx, receipt, MODULE_PATH_VAR, module_path);
    export(sys, ctx, receipt, MODE_VAR, ctx.mode.as_str().to_string());

    receipt.record(STEP, format!("reserved listener port {}", ctx.listen_port));

    // (b) version-control metadata may have landed with the source copy
    // under its original ownership; fix it so in-container updates stay
    // possible. Absence is not an error.
    let vcs_dir = ctx.root.join(".git");
    if sys.dir_exists(&vcs_dir) {
        attempt_best_effort(
            receipt,
            &format!(
                "recursive ownership fix over {} ({})",
                vcs_dir.display(),
                ctx.identity.display_owner()
            ),
            || sys.chown_recursive(&vcs_dir, ctx.identity.uid, ctx.identity.gid),
        );
    } else {
        receipt.record_skipped(STEP, "no version-control metadata present");
    }

    // (c) the drop. Must be last; nothing beyond this point may require
    // privileges.
    sys.drop_privileges(ctx.identity.uid, ctx.identity.gid)
        .map_err(|err| ProvisionError::PrivilegeDrop {
            reason: err.to_string(),
        })?;
    receipt.record(
        STEP,
        format!(
            "dropped privileges to {} (uid {}, gid {})",
            ctx.identity.display_owner(),
            ctx.identity.uid,
            ctx.identity.gid
        ),
    );

    Ok(())
}

/// Prepend an entry to a colon-separated search path, keeping any
/// inherited value. An entry already on the path is not added again, so
/// reruns converge instead of stacking duplicates.
fn prepend_path(entry: &str, existing: Option<String>) -> String {
    match existing {
        Some(rest) if !rest.is_empty() => {
            if rest.split(':').any(|component| component == entry) {
                rest
            } else {
                format!("{entry}:{rest}")
            }
        }
        _ => entry.to_string(),
    }
}

fn export(
    sys: &dyn System,
    ctx: &mut BuildContext,
    receipt: &mut ProvisionReceipt,
    key: &str,
    value: String,
) {
    sys.set_env(key, &value);
    receipt.record(STEP, format!("exported {key}={value}"));
    ctx.export(key, value);
}

/// Run an operation whose failure must never abort the sequence. The
/// outcome lands on the receipt either way; this wrapper is the only place
/// a failing system operation turns into a warning instead of an error.
fn attempt_best_effort(
    receipt: &mut ProvisionReceipt,
    label: &str,
    op: impl FnOnce() -> Result<(), SysError>,
) {
    match op() {
        Ok(()) => receipt.record(STEP, format!("{label} applied")),
        Err(err) => receipt.warn(format!("{label} failed: {err}")),
    }
}
