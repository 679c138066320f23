//! Provisioning steps
//!
//! One module per step of the sequence, in execution order:
//!
//! 1. `identity` - unprivileged system account and group
//! 2. `layout` - fixed directory tree with ownership set at creation
//! 3. `deps` - two-phase staged dependency install for both sets
//! 4. `assets` - front-end asset build
//! 5. `services` - reverse-proxy and metrics-collector configuration
//! 6. `finalize` - environment exports and the irreversible privilege drop
//!
//! Steps receive the system port, the build context, and the receipt; they
//! return `ProvisionResult` and never catch their own fatal errors; the
//! pipeline short-circuits on the first failure.

pub mod assets;
pub mod deps;
pub mod finalize;
pub mod identity;
pub mod layout;
pub mod services;
