//! Build-root lock
//!
//! The provisioning sequence is single-writer over the application root
//! and the system config directories. An exclusive advisory lock next to
//! the application root enforces that: a second concurrent run fails
//! immediately with `LockHeld` instead of interleaving writes.

use std::fs;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{ProvisionError, ProvisionResult};

/// Held for the duration of a provisioning run; released on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: fs::File,
    path: PathBuf,
}

impl BuildLock {
    /// Lock file path for an application root: the root path with a
    /// `.lock` suffix, as a sibling so it survives re-creation of the
    /// root itself.
    pub fn path_for(home: &Path) -> PathBuf {
        let mut os = home.as_os_str().to_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    /// Acquire the exclusive build lock, creating parent directories and
    /// the lock file as needed. Fails without blocking if another run
    /// holds it.
    pub fn acquire(path: &Path) -> ProvisionResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        file.try_lock_exclusive()
            .map_err(|_| ProvisionError::LockHeld {
                path: path.to_path_buf(),
            })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
