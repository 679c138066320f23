//! Build context threaded through the provisioning steps
//!
//! The sequence deliberately produces one shared environment (one
//! filesystem tree, one process environment), but the steps themselves
//! receive that state as an explicit value instead of reaching for
//! globals, so each step stays independently testable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{Config, DeployMode};
use crate::models::ExecutionIdentity;

/// State accumulated across the provisioning sequence.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The unprivileged identity resolved by the identity step
    pub identity: ExecutionIdentity,

    /// Application root (the identity's home directory)
    pub root: PathBuf,

    /// Environment accumulated for the handed-off process. Ordered so
    /// receipts and exec environments are deterministic.
    pub env: BTreeMap<String, String>,

    /// Deployment mode exported at finalization
    pub mode: DeployMode,

    /// Port reserved for the application listener
    pub listen_port: u16,
}

impl BuildContext {
    /// Build the initial context from a resolved identity and the
    /// run configuration.
    pub fn new(identity: ExecutionIdentity, config: &Config) -> Self {
        let root = identity.home.clone();
        Self {
            identity,
            root,
            env: BTreeMap::new(),
            mode: config.runtime.mode,
            listen_port: config.runtime.listen_port,
        }
    }

    /// Absolute path of a node under the application root.
    pub fn under_root(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Record an environment variable for the handed-off process.
    pub fn export(&mut self, key: &str, value: String) {
        self.env.insert(key.to_string(), value);
    }

    /// Environment as ordered pairs, for `Command::envs` and receipts.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionIdentity;

    fn test_identity() -> ExecutionIdentity {
        ExecutionIdentity {
            user: "hypothesis".to_string(),
            group: "hypothesis".to_string(),
            home: PathBuf::from("/var/lib/hypothesis"),
            uid: 999,
            gid: 999,
        }
    }

    #[test]
    fn test_root_is_identity_home() {
        let ctx = BuildContext::new(test_identity(), &Config::default());
        assert_eq!(ctx.root, PathBuf::from("/var/lib/hypothesis"));
        assert_eq!(
            ctx.under_root(Path::new("build")),
            PathBuf::from("/var/lib/hypothesis/build")
        );
    }

    #[test]
    fn test_export_is_ordered_and_last_write_wins() {
        let mut ctx = BuildContext::new(test_identity(), &Config::default());
        ctx.export("PYTHONPATH", "/var/lib/hypothesis".to_string());
        ctx.export("PATH", "/var/lib/hypothesis/bin".to_string());
        ctx.export("PATH", "/var/lib/hypothesis/bin:/usr/bin".to_string());

        let pairs = ctx.env_pairs();
        assert_eq!(pairs.len(), 2);
        // BTreeMap keeps keys sorted: PATH before PYTHONPATH
        assert_eq!(pairs[0].0, "PATH");
        assert_eq!(pairs[0].1, "/var/lib/hypothesis/bin:/usr/bin");
    }
}
