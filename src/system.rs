//! System operations port
//!
//! Abstracts the account, filesystem, process, and privilege operations the
//! provisioning steps need, so the steps can run against the real host, a
//! pure planning backend (`plan`), or an in-memory mock in tests.
//!
//! The host implementation refuses to follow symlinks when changing
//! ownership: recursive chown walks with `symlink_metadata` and uses
//! `fchownat` with `AT_SYMLINK_NOFOLLOW`.

use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::fcntl::AtFlags;
use nix::unistd::{self, Gid, Uid};
use thiserror::Error;

/// Result type for low-level system operations
pub type SysResult<T> = Result<T, SysError>;

/// Low-level failure from a system operation. Steps wrap these into the
/// fatal category they belong to.
#[derive(Error, Debug)]
pub enum SysError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("failed to execute {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("account lookup for '{name}' failed: {reason}")]
    AccountLookup { name: String, reason: String },

    #[error("refusing to operate on symlink path: {0}")]
    SymlinkRefused(PathBuf),

    #[error("{0}")]
    PrivilegeChange(String),
}

/// Port over the host operations the provisioning sequence performs.
///
/// `Send + Sync` so the two first-phase dependency installs can run on
/// scoped threads against a shared backend.
pub trait System: Send + Sync {
    // Accounts
    fn group_exists(&self, name: &str) -> SysResult<bool>;
    fn user_exists(&self, name: &str) -> SysResult<bool>;
    fn create_system_group(&self, name: &str) -> SysResult<()>;
    fn create_system_user(&self, name: &str, group: &str, home: &Path) -> SysResult<()>;
    /// Resolve `(uid, gid)` for an existing user/group pair
    fn resolve_ids(&self, user: &str, group: &str) -> SysResult<(u32, u32)>;

    // Filesystem
    fn dir_exists(&self, path: &Path) -> bool;
    fn file_exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> SysResult<()>;
    fn read_file(&self, path: &Path) -> SysResult<Vec<u8>>;
    fn write_file(&self, path: &Path, bytes: &[u8]) -> SysResult<()>;
    fn copy_file(&self, src: &Path, dst: &Path) -> SysResult<()>;
    /// Recursive copy of a directory tree; relative symlinks are
    /// recreated, never followed
    fn copy_tree(&self, src: &Path, dst: &Path) -> SysResult<()>;
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> SysResult<()>;
    fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> SysResult<()>;

    // Processes
    fn run_command(&self, program: &str, args: &[String], cwd: &Path) -> SysResult<()>;

    // Process-wide environment
    fn env_var(&self, key: &str) -> Option<String>;
    fn set_env(&self, key: &str, value: &str);

    // Privilege
    fn effective_uid(&self) -> u32;
    /// Irreversibly switch to the given identity: supplementary groups
    /// first, then gid, then uid
    fn drop_privileges(&self, uid: u32, gid: u32) -> SysResult<()>;
}

/// Real host backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }
}

fn nologin_shell() -> &'static str {
    if Path::new("/usr/sbin/nologin").exists() {
        "/usr/sbin/nologin"
    } else {
        "/usr/bin/nologin"
    }
}

/// chown without following symlinks.
fn lchown(path: &Path, uid: u32, gid: u32) -> SysResult<()> {
    let cwd_fd = fs::File::open(".")?;
    unistd::fchownat(
        Some(cwd_fd.as_raw_fd()),
        path,
        Some(Uid::from_raw(uid)),
        Some(Gid::from_raw(gid)),
        AtFlags::AT_SYMLINK_NOFOLLOW,
    )
    .map_err(|err| SysError::PrivilegeChange(format!("chown {} failed: {err}", path.display())))
}

impl System for HostSystem {
    fn group_exists(&self, name: &str) -> SysResult<bool> {
        unistd::Group::from_name(name)
            .map(|g| g.is_some())
            .map_err(|err| SysError::AccountLookup {
                name: name.to_string(),
                reason: err.to_string(),
            })
    }

    fn user_exists(&self, name: &str) -> SysResult<bool> {
        unistd::User::from_name(name)
            .map(|u| u.is_some())
            .map_err(|err| SysError::AccountLookup {
                name: name.to_string(),
                reason: err.to_string(),
            })
    }

    fn create_system_group(&self, name: &str) -> SysResult<()> {
        run_host_command("groupadd", &["-r", name], None)
    }

    fn create_system_user(&self, name: &str, group: &str, home: &Path) -> SysResult<()> {
        let home_str = home.to_string_lossy();
        run_host_command(
            "useradd",
            &[
                "-r",
                "-g",
                group,
                "-d",
                home_str.as_ref(),
                "-m",
                "-s",
                nologin_shell(),
                name,
            ],
            None,
        )
    }

    fn resolve_ids(&self, user: &str, group: &str) -> SysResult<(u32, u32)> {
        let resolved_user = unistd::User::from_name(user)
            .map_err(|err| SysError::AccountLookup {
                name: user.to_string(),
                reason: err.to_string(),
            })?
            .ok_or_else(|| SysError::AccountLookup {
                name: user.to_string(),
                reason: "user not found".to_string(),
            })?;
        let resolved_group = unistd::Group::from_name(group)
            .map_err(|err| SysError::AccountLookup {
                name: group.to_string(),
                reason: err.to_string(),
            })?
            .ok_or_else(|| SysError::AccountLookup {
                name: group.to_string(),
                reason: "group not found".to_string(),
            })?;
        Ok((
            resolved_user.uid.as_raw(),
            resolved_group.gid.as_raw(),
        ))
    }

    fn dir_exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn file_exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    fn create_dir_all(&self, path: &Path) -> SysResult<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn read_file(&self, path: &Path) -> SysResult<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> SysResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> SysResult<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        Ok(())
    }

    fn copy_tree(&self, src: &Path, dst: &Path) -> SysResult<()> {
        if src == dst {
            return Ok(());
        }
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            let from = entry.path();
            let to = dst.join(entry.file_name());
            let meta = fs::symlink_metadata(&from)?;
            if meta.file_type().is_symlink() {
                let target = fs::read_link(&from)?;
                if fs::symlink_metadata(&to).is_ok() {
                    fs::remove_file(&to)?;
                }
                std::os::unix::fs::symlink(&target, &to)?;
            } else if meta.is_dir() {
                self.copy_tree(&from, &to)?;
            } else {
                fs::copy(&from, &to)?;
            }
        }
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> SysResult<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_symlink() {
            return Err(SysError::SymlinkRefused(path.to_path_buf()));
        }
        lchown(path, uid, gid)
    }

    fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> SysResult<()> {
        if fs::symlink_metadata(path).is_err() {
            return Ok(());
        }
        let mut stack = vec![path.to_path_buf()];
        while let Some(current) = stack.pop() {
            let meta = fs::symlink_metadata(&current)?;
            // Re-own the link itself, never what it points at
            lchown(&current, uid, gid)?;
            if meta.is_dir() {
                for entry in fs::read_dir(&current)? {
                    stack.push(entry?.path());
                }
            }
        }
        Ok(())
    }

    fn run_command(&self, program: &str, args: &[String], cwd: &Path) -> SysResult<()> {
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_host_command(program, &arg_refs, Some(cwd))
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_env(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn effective_uid(&self) -> u32 {
        unistd::geteuid().as_raw()
    }

    fn drop_privileges(&self, uid: u32, gid: u32) -> SysResult<()> {
        let gid = Gid::from_raw(gid);
        let uid = Uid::from_raw(uid);
        unistd::setgroups(&[gid])
            .map_err(|err| SysError::PrivilegeChange(format!("setgroups failed: {err}")))?;
        unistd::setgid(gid)
            .map_err(|err| SysError::PrivilegeChange(format!("setgid failed: {err}")))?;
        unistd::setuid(uid)
            .map_err(|err| SysError::PrivilegeChange(format!("setuid failed: {err}")))?;
        if unistd::geteuid() != uid {
            return Err(SysError::PrivilegeChange(
                "effective uid unchanged after setuid".to_string(),
            ));
        }
        Ok(())
    }
}

fn run_host_command(program: &str, args: &[&str], cwd: Option<&Path>) -> SysResult<()> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command.output().map_err(|err| SysError::Spawn {
        program: program.to_string(),
        reason: err.to_string(),
    })?;
    if !output.status.success() {
        return Err(SysError::CommandFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Pure planning backend for `plan`: nothing exists, every mutation
/// succeeds without touching the host, reads fail as not-found. Fully
/// deterministic so plans are stable across hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanSystem;

impl PlanSystem {
    pub fn new() -> Self {
        Self
    }

    /// Fixed ids reported for the not-yet-created identity.
    pub const PLANNED_UID: u32 = 999;
    pub const PLANNED_GID: u32 = 999;
}

fn plan_not_found(path: &Path) -> SysError {
    SysError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} (planning backend reads nothing)", path.display()),
    ))
}

impl System for PlanSystem {
    fn group_exists(&self, _name: &str) -> SysResult<bool> {
        Ok(false)
    }

    fn user_exists(&self, _name: &str) -> SysResult<bool> {
        Ok(false)
    }

    fn create_system_group(&self, _name: &str) -> SysResult<()> {
        Ok(())
    }

    fn create_system_user(&self, _name: &str, _group: &str, _home: &Path) -> SysResult<()> {
        Ok(())
    }

    fn resolve_ids(&self, _user: &str, _group: &str) -> SysResult<(u32, u32)> {
        Ok((Self::PLANNED_UID, Self::PLANNED_GID))
    }

    fn dir_exists(&self, _path: &Path) -> bool {
        false
    }

    fn file_exists(&self, _path: &Path) -> bool {
        false
    }

    fn create_dir_all(&self, _path: &Path) -> SysResult<()> {
        Ok(())
    }

    fn read_file(&self, path: &Path) -> SysResult<Vec<u8>> {
        Err(plan_not_found(path))
    }

    fn write_file(&self, _path: &Path, _bytes: &[u8]) -> SysResult<()> {
        Ok(())
    }

    fn copy_file(&self, _src: &Path, _dst: &Path) -> SysResult<()> {
        Ok(())
    }

    fn copy_tree(&self, _src: &Path, _dst: &Path) -> SysResult<()> {
        Ok(())
    }

    fn chown(&self, _path: &Path, _uid: u32, _gid: u32) -> SysResult<()> {
        Ok(())
    }

    fn chown_recursive(&self, _path: &Path, _uid: u32, _gid: u32) -> SysResult<()> {
        Ok(())
    }

    fn run_command(&self, _program: &str, _args: &[String], _cwd: &Path) -> SysResult<()> {
        Ok(())
    }

    fn env_var(&self, _key: &str) -> Option<String> {
        None
    }

    fn set_env(&self, _key: &str, _value: &str) {}

    fn effective_uid(&self) -> u32 {
        0
    }

    fn drop_privileges(&self, _uid: u32, _gid: u32) -> SysResult<()> {
        Ok(())
    }
}

/// In-memory backend for tests.
///
/// Uses a `Mutex` internally so it can be shared across the scoped install
/// threads. Records every operation in order, which lets tests assert the
/// sequencing invariants (identity before layout, drop last, and so on).
#[cfg(test)]
pub struct MockSystem {
    state: std::sync::Mutex<MockState>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    groups: std::collections::HashSet<String>,
    users: std::collections::HashSet<String>,
    dirs: std::collections::HashSet<PathBuf>,
    files: std::collections::HashMap<PathBuf, Vec<u8>>,
    owners: std::collections::HashMap<PathBuf, (u32, u32)>,
    env: std::collections::HashMap<String, String>,
    ops: Vec<String>,
    dropped_to: Option<(u32, u32)>,
    fail_programs: std::collections::HashSet<String>,
    fail_chown_under: Vec<PathBuf>,
}

#[cfg(test)]
impl MockSystem {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(MockState::default()),
        }
    }

    pub fn add_source_file(&self, path: &Path, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(parent) = path.parent() {
            state.dirs.insert(parent.to_path_buf());
        }
        state.files.insert(path.to_path_buf(), content.to_vec());
    }

    pub fn add_dir(&self, path: &Path) {
        self.state.lock().unwrap().dirs.insert(path.to_path_buf());
    }

    pub fn add_group(&self, name: &str) {
        self.state.lock().unwrap().groups.insert(name.to_string());
    }

    /// Make `run_command` fail for the given program.
    pub fn fail_program(&self, program: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_programs
            .insert(program.to_string());
    }

    /// Make ownership changes fail for paths under the given prefix.
    pub fn fail_chown_under(&self, prefix: &Path) {
        self.state
            .lock()
            .unwrap()
            .fail_chown_under
            .push(prefix.to_path_buf());
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn owner_of(&self, path: &Path) -> Option<(u32, u32)> {
        self.state.lock().unwrap().owners.get(path).copied()
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.state.lock().unwrap().files.contains_key(path)
    }

    pub fn file_content(&self, path: &Path) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn dropped_to(&self) -> Option<(u32, u32)> {
        self.state.lock().unwrap().dropped_to
    }

    pub fn env_value(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().env.get(key).cloned()
    }

    fn log(&self, op: String) {
        self.state.lock().unwrap().ops.push(op);
    }

    fn chown_should_fail(state: &MockState, path: &Path) -> bool {
        state
            .fail_chown_under
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }
}

#[cfg(test)]
impl System for MockSystem {
    fn group_exists(&self, name: &str) -> SysResult<bool> {
        Ok(self.state.lock().unwrap().groups.contains(name))
    }

    fn user_exists(&self, name: &str) -> SysResult<bool> {
        Ok(self.state.lock().unwrap().users.contains(name))
    }

    fn create_system_group(&self, name: &str) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        state.groups.insert(name.to_string());
        state.ops.push(format!("groupadd:{name}"));
        Ok(())
    }

    fn create_system_user(&self, name: &str, _group: &str, home: &Path) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        state.users.insert(name.to_string());
        state.dirs.insert(home.to_path_buf());
        state.owners.insert(home.to_path_buf(), (999, 999));
        state.ops.push(format!("useradd:{name}"));
        Ok(())
    }

    fn resolve_ids(&self, user: &str, group: &str) -> SysResult<(u32, u32)> {
        let state = self.state.lock().unwrap();
        if !state.users.contains(user) {
            return Err(SysError::AccountLookup {
                name: user.to_string(),
                reason: "user not found".to_string(),
            });
        }
        if !state.groups.contains(group) && !state.users.contains(group) {
            return Err(SysError::AccountLookup {
                name: group.to_string(),
                reason: "group not found".to_string(),
            });
        }
        Ok((999, 999))
    }

    fn dir_exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().files.contains_key(path)
    }

    fn create_dir_all(&self, path: &Path) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        state.dirs.insert(path.to_path_buf());
        state.ops.push(format!("mkdir:{}", path.display()));
        Ok(())
    }

    fn read_file(&self, path: &Path) -> SysResult<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| {
                SysError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                ))
            })
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        state.files.insert(path.to_path_buf(), bytes.to_vec());
        state.ops.push(format!("write:{}", path.display()));
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        let content = state.files.get(src).cloned().ok_or_else(|| {
            SysError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", src.display()),
            ))
        })?;
        state.files.insert(dst.to_path_buf(), content);
        state
            .ops
            .push(format!("copy:{}:{}", src.display(), dst.display()));
        Ok(())
    }

    fn copy_tree(&self, src: &Path, dst: &Path) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.dirs.contains(src) && !state.files.keys().any(|p| p.starts_with(src)) {
            return Err(SysError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", src.display()),
            )));
        }
        let copies: Vec<(PathBuf, Vec<u8>)> = state
            .files
            .iter()
            .filter_map(|(path, content)| {
                path.strip_prefix(src)
                    .ok()
                    .map(|rel| (dst.join(rel), content.clone()))
            })
            .collect();
        for (path, content) in copies {
            state.files.insert(path, content);
        }
        state.dirs.insert(dst.to_path_buf());
        state
            .ops
            .push(format!("copytree:{}:{}", src.display(), dst.display()));
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        if MockSystem::chown_should_fail(&state, path) {
            return Err(SysError::PrivilegeChange(format!(
                "chown {} failed: permission denied",
                path.display()
            )));
        }
        state.owners.insert(path.to_path_buf(), (uid, gid));
        state.ops.push(format!("chown:{}", path.display()));
        Ok(())
    }

    fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        if MockSystem::chown_should_fail(&state, path) {
            return Err(SysError::PrivilegeChange(format!(
                "chown {} failed: permission denied",
                path.display()
            )));
        }
        let affected: Vec<PathBuf> = state
            .dirs
            .iter()
            .chain(state.files.keys())
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        state.owners.insert(path.to_path_buf(), (uid, gid));
        for p in affected {
            state.owners.insert(p, (uid, gid));
        }
        state.ops.push(format!("chown-r:{}", path.display()));
        Ok(())
    }

    fn run_command(&self, program: &str, args: &[String], cwd: &Path) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .ops
            .push(format!("run:{}:{}:{}", program, args.join(" "), cwd.display()));
        if state.fail_programs.contains(program) {
            return Err(SysError::CommandFailed {
                program: program.to_string(),
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    fn env_var(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().env.get(key).cloned()
    }

    fn set_env(&self, key: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        state.env.insert(key.to_string(), value.to_string());
        state.ops.push(format!("setenv:{key}"));
    }

    fn effective_uid(&self) -> u32 {
        0
    }

    fn drop_privileges(&self, uid: u32, gid: u32) -> SysResult<()> {
        let mut state = self.state.lock().unwrap();
        state.dropped_to = Some((uid, gid));
        state.ops.push(format!("drop:{uid}:{gid}"));
        Ok(())
    }
}
