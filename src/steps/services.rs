//! Service configuration step
//!
//! Copies the reverse-proxy and metrics-collector configuration payloads
//! verbatim to their system destinations, then re-owns each service's
//! runtime directories (state, log, temp) to the unprivileged identity.
//! The daemons themselves may run as other accounts; the re-ownership is
//! for the application process, which must observe those directories as
//! writable under its own identity.
//!
//! Independent of the dependency and asset steps; only requires the
//! layout step to have run.

use crate::config::{Config, ServiceConfig};
use crate::context::BuildContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::report::ProvisionReceipt;
use crate::steps::layout::{ensure_owned_dir, DirOutcome};
use crate::system::System;

const STEP: &str = "services";

pub fn configure(
    sys: &dyn System,
    ctx: &BuildContext,
    config: &Config,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    for (name, service) in [
        ("nginx", &config.services.nginx),
        ("collectd", &config.services.collectd),
    ] {
        configure_service(sys, ctx, config, name, service, receipt)?;
    }
    Ok(())
}

fn configure_service(
    sys: &dyn System,
    ctx: &BuildContext,
    config: &Config,
    name: &str,
    service: &ServiceConfig,
    receipt: &mut ProvisionReceipt,
) -> ProvisionResult<()> {
    let source = config.source.root.join(&service.payload);

    sys.copy_file(&source, &service.destination).map_err(|err| {
        ProvisionError::ConfigurationCopy {
            source_path: source.clone(),
            destination: service.destination.clone(),
            reason: err.to_string(),
        }
    })?;
    receipt.record(
        STEP,
        format!(
            "installed {name} configuration at {}",
            service.destination.display()
        ),
    );

    for dir in &service.runtime_dirs {
        let outcome = ensure_owned_dir(sys, dir, &ctx.identity).map_err(|err| {
            ProvisionError::ConfigurationCopy {
                source_path: source.clone(),
                destination: dir.clone(),
                reason: format!("cannot make runtime directory writable: {err}"),
            }
        })?;
        let verb = match outcome {
            DirOutcome::Created => {
                receipt.dirs_created += 1;
                "created"
            }
            DirOutcome::Reowned => {
                receipt.dirs_existing += 1;
                "re-owned"
            }
        };
        receipt.record(
            STEP,
            format!(
                "{verb} {name} runtime directory {} ({})",
                dir.display(),
                ctx.identity.display_owner()
            ),
        );
    }

    Ok(())
}
