//! Per-mount-point, cross-process operation lock.
//!
//! A lock is a file `lock-<key>.lock` in the shared lock directory holding
//! the owner's pid. Test-and-reclaim of a lock runs under an exclusive `flock` on
//! the companion `lock-<key>.guard` file so two processes can never both
//! decide a stale lock is theirs.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::errors::GuardError;
use crate::naming;

/// Upper bound on waiting for the companion flock.
const GUARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Return `true` unless `kill(pid, 0)` reports that no such process exists.
///
/// `EPERM` means the process exists but belongs to another user.
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

pub struct ConcurrencyGuard {
    dir: PathBuf,
}

impl ConcurrencyGuard {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Take the lease for `mount_point`, reclaiming a lock left by a dead process.
    ///
    /// A live holder yields `GuardError::Busy` immediately.
    pub fn acquire(&self, mount_point: &Path) -> Result<Lease, GuardError> {
        naming::ensure_shared_dir(&self.dir).map_err(|source| GuardError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let lock_path = self.dir.join(naming::lock_file_name(mount_point));
        let guard_path = self.dir.join(naming::guard_file_name(mount_point));
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| GuardError::Io { path, source }
        };

        let guard_file = open_guard_file(&guard_path).map_err(io_err(&guard_path))?;
        lock_with_timeout(&guard_file).map_err(io_err(&guard_path))?;

        let own_pid = std::process::id();
        let result = loop {
            match create_lock_file(&lock_path, own_pid) {
                Ok(()) => {
                    tracing::debug!(lock = %lock_path.display(), pid = own_pid, "lease acquired");
                    break Ok(Lease {
                        path: lock_path,
                        pid: own_pid,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => break Err(io_err(&lock_path)(e)),
            }

            let holder = read_pid(&lock_path);
            match holder {
                Some(pid) if is_process_alive(pid) => {
                    break Err(GuardError::Busy {
                        mount_point: mount_point.to_path_buf(),
                        pid: pid.unsigned_abs(),
                    });
                }
                _ => {
                    tracing::info!(
                        lock = %lock_path.display(),
                        stale_pid = ?holder,
                        "reclaiming stale lock"
                    );
                    match std::fs::remove_file(&lock_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => break Err(io_err(&lock_path)(e)),
                    }
                }
            }
        };

        let _ = guard_file.unlock();
        result
    }
}

/// Open (creating if needed) the companion file. A guard file created by
/// another user is only readable, which is enough for `flock`.
fn open_guard_file(path: &Path) -> std::io::Result<File> {
    match OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
    {
        Err(e) if e.kind() == ErrorKind::PermissionDenied => File::open(path),
        other => other,
    }
}

fn lock_with_timeout(file: &File) -> std::io::Result<()> {
    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if start.elapsed() > GUARD_TIMEOUT {
                    return Err(std::io::Error::new(
                        ErrorKind::TimedOut,
                        format!("timed out after {GUARD_TIMEOUT:?} waiting for lock guard"),
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(e),
        }
    }
}

fn create_lock_file(path: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}

/// Pid recorded in a lock file; `None` when missing or unparsable.
fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// A held operation lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct Lease {
    path: PathBuf,
    pid: u32,
}

impl Lease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Only remove a lock that still names this process.
        if read_pid(&self.path) == Some(self.pid as i32) {
            match std::fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!(lock = %self.path.display(), "lease released"),
                Err(e) => tracing::warn!(lock = %self.path.display(), "cannot release lease: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id() as i32));
    }

    #[test]
    fn init_is_alive_even_without_permission() {
        assert!(is_process_alive(1));
    }

    #[test]
    fn non_positive_pid_is_not_alive() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(-5));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        assert!(!is_process_alive(dead_pid() as i32));
    }

    #[test]
    fn acquire_writes_pid_and_drop_removes_lock() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ConcurrencyGuard::new(dir.path().join("rt"));
        let lease = guard.acquire(Path::new("/mnt/nas")).unwrap();
        let path = lease.path().to_path_buf();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim(),
            std::process::id().to_string()
        );
        drop(lease);
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_while_held_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ConcurrencyGuard::new(dir.path());
        let _lease = guard.acquire(Path::new("/mnt/nas")).unwrap();
        match guard.acquire(Path::new("/mnt/nas")) {
            Err(GuardError::Busy { pid, mount_point }) => {
                assert_eq!(pid, std::process::id());
                assert_eq!(mount_point, PathBuf::from("/mnt/nas"));
            }
            other => panic!("expected Busy, got {other:?}"),
        }
    }

    #[test]
    fn different_mount_points_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ConcurrencyGuard::new(dir.path());
        let _a = guard.acquire(Path::new("/mnt/a")).unwrap();
        let _b = guard.acquire(Path::new("/mnt/b")).unwrap();
    }

    #[test]
    fn lock_of_dead_process_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let mp = Path::new("/mnt/nas");
        let lock_path = dir.path().join(naming::lock_file_name(mp));
        std::fs::write(&lock_path, format!("{}\n", dead_pid())).unwrap();

        let guard = ConcurrencyGuard::new(dir.path());
        let lease = guard.acquire(mp).unwrap();
        assert_eq!(
            std::fs::read_to_string(lease.path()).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn corrupt_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let mp = Path::new("/mnt/nas");
        std::fs::write(dir.path().join(naming::lock_file_name(mp)), "garbage").unwrap();
        let guard = ConcurrencyGuard::new(dir.path());
        assert!(guard.acquire(mp).is_ok());
    }

    #[test]
    fn lock_of_live_foreign_process_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let mp = Path::new("/mnt/nas");
        std::fs::write(dir.path().join(naming::lock_file_name(mp)), "1\n").unwrap();
        let guard = ConcurrencyGuard::new(dir.path());
        assert!(matches!(
            guard.acquire(mp),
            Err(GuardError::Busy { pid: 1, .. })
        ));
    }

    #[test]
    fn drop_leaves_lock_taken_over_by_another_pid() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ConcurrencyGuard::new(dir.path());
        let lease = guard.acquire(Path::new("/mnt/nas")).unwrap();
        let path = lease.path().to_path_buf();
        std::fs::write(&path, "1\n").unwrap();
        drop(lease);
        assert!(path.exists());
    }

    #[test]
    fn racing_acquirers_admit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let root = Arc::new(dir.path().to_path_buf());
        let threads = 8;
        let start = Arc::new(Barrier::new(threads));
        let hold = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let root = Arc::clone(&root);
                let start = Arc::clone(&start);
                let hold = Arc::clone(&hold);
                std::thread::spawn(move || {
                    let guard = ConcurrencyGuard::new(root.as_path());
                    start.wait();
                    let lease = guard.acquire(Path::new("/mnt/nas"));
                    let won = lease.is_ok();
                    // Keep any lease alive until every thread has tried.
                    hold.wait();
                    drop(lease);
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn acquire_makes_lock_dir_shared() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let locks = dir.path().join("locks");
        let _lease = ConcurrencyGuard::new(&locks)
            .acquire(Path::new("/mnt/nas"))
            .unwrap();
        let mode = std::fs::metadata(&locks).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o1777);
    }

    #[test]
    fn read_only_guard_file_still_serializes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let mp = Path::new("/mnt/nas");
        let guard_path = dir.path().join(naming::guard_file_name(mp));
        std::fs::write(&guard_path, "").unwrap();
        std::fs::set_permissions(&guard_path, std::fs::Permissions::from_mode(0o444)).unwrap();

        let guard = ConcurrencyGuard::new(dir.path());
        let _lease = guard.acquire(mp).unwrap();
        assert!(matches!(guard.acquire(mp), Err(GuardError::Busy { .. })));
    }

    #[test]
    fn root_and_user_runs_contend_for_one_lock() {
        let dir = tempfile::tempdir().unwrap();
        let shared = naming::resolve_lock_dir(Some(dir.path().into()), true, Path::new("/tmp"));
        let as_root = ConcurrencyGuard::new(&shared);
        let as_user = ConcurrencyGuard::new(naming::resolve_lock_dir(
            Some(dir.path().into()),
            true,
            Path::new("/tmp"),
        ));
        let _lease = as_root.acquire(Path::new("/mnt/nas")).unwrap();
        assert!(matches!(
            as_user.acquire(Path::new("/mnt/nas")),
            Err(GuardError::Busy { .. })
        ));
    }
}
