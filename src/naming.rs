//! Names and locations of runtime artifacts (lock files, credential files).
//!
//! Lock files live in one directory shared by every user so that a lease is
//! system-wide. Credential files live in a private per-user runtime directory.

use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Prefix of ephemeral credential files inside the runtime directory.
pub const CRED_PREFIX: &str = ".cred-";

/// Prefix of the write-probe marker created inside a mount point.
pub const WRITE_TEST_PREFIX: &str = ".nasmount-write-test-";

/// Sanitize a path component: replace non-alphanumeric chars with `-`, max 30 chars.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(30)
        .collect()
}

/// Compute SHA256 of `text` and return the first 8 hex characters.
pub fn compute_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Stable key for a mount point: `<last-component>-<hash8>`.
///
/// The root directory has no file name and sanitizes to `root`.
pub fn mount_key(mount_point: &Path) -> String {
    let name = mount_point
        .file_name()
        .map(|n| sanitize_name(&n.to_string_lossy()))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string());
    let hash = compute_hash(&mount_point.to_string_lossy());
    format!("{name}-{hash}")
}

/// Lock file for a mount point: `lock-<key>.lock`.
pub fn lock_file_name(mount_point: &Path) -> String {
    format!("lock-{}.lock", mount_key(mount_point))
}

/// Companion file flock'ed while a lock is tested and reclaimed.
pub fn guard_file_name(mount_point: &Path) -> String {
    format!("lock-{}.guard", mount_key(mount_point))
}

/// Extract the pid from a credential file name (`.cred-<pid>-<random>`).
pub fn cred_file_pid(file_name: &str) -> Option<i32> {
    let rest = file_name.strip_prefix(CRED_PREFIX)?;
    let (pid, _) = rest.split_once('-')?;
    pid.parse().ok().filter(|p| *p > 0)
}

/// Default lock directory when `/run/lock` exists.
pub const SYSTEM_LOCK_DIR: &str = "/run/lock/nasmount";

/// Resolve the lock directory from its inputs.
///
/// `NASMOUNT_LOCK_DIR` wins; otherwise `/run/lock/nasmount`, falling back to
/// `/tmp/nasmount-locks` on hosts without `/run/lock`. No input depends on
/// the calling user.
pub fn resolve_lock_dir(
    override_dir: Option<OsString>,
    run_lock_present: bool,
    fallback_root: &Path,
) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if run_lock_present {
        return PathBuf::from(SYSTEM_LOCK_DIR);
    }
    fallback_root.join("nasmount-locks")
}

/// The lock directory for this host.
pub fn lock_dir() -> PathBuf {
    resolve_lock_dir(
        std::env::var_os("NASMOUNT_LOCK_DIR"),
        Path::new("/run/lock").is_dir(),
        Path::new("/tmp"),
    )
}

/// Resolve the runtime directory from its inputs.
///
/// `NASMOUNT_RUNTIME_DIR` wins; root uses `/run/nasmount`; otherwise
/// `$XDG_RUNTIME_DIR/nasmount`, falling back to `<tmp>/nasmount-<uid>`.
pub fn resolve_runtime_dir(
    override_dir: Option<OsString>,
    is_root: bool,
    xdg_runtime_dir: Option<OsString>,
    tmp: &Path,
    uid: u32,
) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if is_root {
        return PathBuf::from("/run/nasmount");
    }
    if let Some(xdg) = xdg_runtime_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(xdg).join("nasmount");
    }
    tmp.join(format!("nasmount-{uid}"))
}

/// The runtime directory for this process.
pub fn runtime_dir() -> PathBuf {
    let uid = nix::unistd::getuid();
    resolve_runtime_dir(
        std::env::var_os("NASMOUNT_RUNTIME_DIR"),
        nix::unistd::geteuid().is_root(),
        std::env::var_os("XDG_RUNTIME_DIR"),
        &std::env::temp_dir(),
        uid.as_raw(),
    )
}

/// Create `dir` (and parents) and restrict it to the owner (0700).
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    let perms = std::fs::metadata(dir)?.permissions();
    if perms.mode() & 0o077 != 0 {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Create `dir` (and parents) as a sticky world-writable directory (1777).
///
/// Permissions are only corrected on a directory this process owns.
pub fn ensure_shared_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o1777)
        .create(dir)?;
    let meta = std::fs::metadata(dir)?;
    if meta.uid() == nix::unistd::geteuid().as_raw() && meta.mode() & 0o7777 != 0o1777 {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o1777))?;
    }
    Ok(())
}
