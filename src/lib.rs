//! hyp-provision - container environment provisioner for the hypothesis
//! web application
//!
//! Transforms a base system image into a runnable, correctly-permissioned
//! application environment: creates the unprivileged identity, lays out the
//! directory tree, installs both dependency sets with a staged cache-aware
//! install, builds front-end assets, places service configuration, and
//! drops privileges before handing control to an unprivileged process.

pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod steps;
pub mod system;
pub mod verify;

// Re-exports for convenience
pub use config::{Config, DeployMode};
pub use context::BuildContext;
pub use error::{ProvisionError, ProvisionResult};
pub use lock::BuildLock;
pub use models::{DependencyKind, ExecutionIdentity};
pub use pipeline::ProvisionPipeline;
pub use report::{Action, ProvisionReceipt};
pub use steps::deps::manifest_cache_key;
pub use system::{HostSystem, PlanSystem, System};
pub use verify::{verify_environment, Violation};
