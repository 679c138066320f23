//! Identity provisioning step
//!
//! Ensures the dedicated unprivileged system group and user exist, with
//! the configured home directory. Reruns are no-ops: an existing identity
//! is never an error and never duplicated. There is no fallback identity;
//! any failure here aborts the whole build.

use crate::config::IdentityConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::models::ExecutionIdentity;
use crate::report::ProvisionReceipt;
use crate::system::{SysError, System};

const STEP: &str = "identity";

/// Ensure the group, then the user belonging to it, then resolve ids.
///
/// The group comes first: the user joins it at creation time.
pub fn ensure(
    sys: &dyn System,
    config: &IdentityConfig,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<ExecutionIdentity> {
    if sys
        .group_exists(&config.group)
        .map_err(|err| identity_error(&config.group, err))?
    {
        receipt.record_skipped(
            STEP,
            format!("system group '{}' already exists", config.group),
        );
    } else {
        sys.create_system_group(&config.group)
            .map_err(|err| identity_error(&config.group, err))?;
        receipt.record(STEP, format!("created system group '{}'", config.group));
    }

    if sys
        .user_exists(&config.user)
        .map_err(|err| identity_error(&config.user, err))?
    {
        receipt.record_skipped(
            STEP,
            format!("system user '{}' already exists", config.user),
        );
    } else {
        sys.create_system_user(&config.user, &config.group, &config.home)
            .map_err(|err| identity_error(&config.user, err))?;
        receipt.record(
            STEP,
            format!(
                "created system user '{}' with home {}",
                config.user,
                config.home.display()
            ),
        );
    }

    let (uid, gid) = sys
        .resolve_ids(&config.user, &config.group)
        .map_err(|err| identity_error(&config.user, err))?;

    Ok(ExecutionIdentity {
        user: config.user.clone(),
        group: config.group.clone(),
        home: config.home.clone(),
        uid,
        gid,
    })
}

fn identity_error(name: &str, err: SysError) -> ProvisionError {
    ProvisionError::IdentityProvision {
        name: name.to_string(),
        reason: err.to_string(),
    }
}
