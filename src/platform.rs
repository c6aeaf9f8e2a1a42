use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::cmd::{self, CaptureOutput};
use crate::mount_table::{self, MountEntry};

/// Bound on each `umount` invocation.
const UNMOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the `lsof` scan used to name processes blocking an unmount.
const LSOF_TIMEOUT: Duration = Duration::from_secs(10);

/// Escalation steps for taking a mount down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountMode {
    /// Plain `umount`.
    Graceful,
    /// `umount -f`: abort outstanding requests to an unresponsive server.
    Force,
    /// `umount -l`: detach now, clean up once the last user lets go.
    Lazy,
}

impl UnmountMode {
    pub fn flag(self) -> Option<&'static str> {
        match self {
            UnmountMode::Graceful => None,
            UnmountMode::Force => Some("-f"),
            UnmountMode::Lazy => Some("-l"),
        }
    }
}

/// A process holding files open under a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Storage space of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Space {
    pub total: u64,
    pub free: u64,
}

/// The OS mount facility. Only the mount controller calls the mutating methods.
pub trait MountFacility {
    /// Current mount table, all filesystem types.
    fn mount_table(&self) -> Result<Vec<MountEntry>, String>;

    /// Make sure `mount_point` exists as a directory.
    fn prepare_mount_point(&self, mount_point: &Path) -> Result<(), String>;

    /// Run `mount` with `args`, killing it after `timeout`.
    fn mount(&self, args: &[String], timeout: Option<Duration>) -> Result<CaptureOutput, String>;

    /// Run one unmount step for `mount_point`.
    fn unmount(&self, mount_point: &Path, mode: UnmountMode) -> Result<CaptureOutput, String>;

    /// Processes keeping `mount_point` busy, best effort.
    fn processes_using(&self, _mount_point: &Path) -> Vec<ProcessInfo> {
        Vec::new()
    }
}

/// Drives the real `mount`/`umount` binaries, through `sudo -n` when not root.
pub struct SystemFacility {
    privileged: bool,
}

impl SystemFacility {
    pub fn new() -> Self {
        Self {
            privileged: nix::unistd::geteuid().is_root(),
        }
    }

    fn run(
        &self,
        prog: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CaptureOutput, String> {
        if self.privileged {
            cmd::run_capture_timeout(prog, args, timeout)
        } else {
            let mut sudo_args = vec!["-n".to_string(), prog.to_string()];
            sudo_args.extend_from_slice(args);
            cmd::run_capture_timeout("sudo", &sudo_args, timeout)
        }
    }
}

impl Default for SystemFacility {
    fn default() -> Self {
        Self::new()
    }
}

impl MountFacility for SystemFacility {
    fn mount_table(&self) -> Result<Vec<MountEntry>, String> {
        read_mount_table()
    }

    fn prepare_mount_point(&self, mount_point: &Path) -> Result<(), String> {
        if mount_point.is_dir() {
            return Ok(());
        }
        match std::fs::create_dir_all(mount_point) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && !self.privileged => {
                let path = mount_point.to_string_lossy().into_owned();
                let out = self.run("mkdir", &["-p".to_string(), path], Some(UNMOUNT_TIMEOUT))?;
                if out.status == 0 {
                    Ok(())
                } else {
                    Err(format!(
                        "cannot create {}: {}",
                        mount_point.display(),
                        out.stderr.trim()
                    ))
                }
            }
            Err(e) => Err(format!("cannot create {}: {e}", mount_point.display())),
        }
    }

    fn mount(&self, args: &[String], timeout: Option<Duration>) -> Result<CaptureOutput, String> {
        self.run("mount", args, timeout)
    }

    fn unmount(&self, mount_point: &Path, mode: UnmountMode) -> Result<CaptureOutput, String> {
        self.run("umount", &unmount_args(mount_point, mode), Some(UNMOUNT_TIMEOUT))
    }

    fn processes_using(&self, mount_point: &Path) -> Vec<ProcessInfo> {
        let path = mount_point.to_string_lossy().into_owned();
        match cmd::run_capture_timeout("lsof", &["+f", "--", path.as_str()], Some(LSOF_TIMEOUT)) {
            Ok(out) => parse_lsof(&out.stdout),
            Err(e) => {
                tracing::debug!("cannot run lsof: {e}");
                Vec::new()
            }
        }
    }
}

/// Arguments (without the program name) for one unmount step.
pub fn unmount_args(mount_point: &Path, mode: UnmountMode) -> Vec<String> {
    let mut args: Vec<String> = mode.flag().map(str::to_string).into_iter().collect();
    args.push(mount_point.to_string_lossy().into_owned());
    args
}

/// Parse `lsof` output into one entry per process.
///
/// Format: `COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME`, header first.
pub fn parse_lsof(text: &str) -> Vec<ProcessInfo> {
    let mut by_pid = BTreeMap::new();
    for line in text.lines().skip(1) {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(pid)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(pid) = pid.parse::<u32>() else {
            continue;
        };
        by_pid.entry(pid).or_insert_with(|| name.to_string());
    }
    by_pid
        .into_iter()
        .map(|(pid, name)| ProcessInfo { pid, name })
        .collect()
}

/// Read the system mount table.
///
/// Linux: reads `/proc/mounts` and parses with `parse_proc_mounts`.
/// macOS: runs `mount` and parses with `parse_mount_output`.
pub fn read_mount_table() -> Result<Vec<MountEntry>, String> {
    #[cfg(target_os = "linux")]
    {
        let text = std::fs::read_to_string("/proc/mounts")
            .map_err(|e| format!("Failed to read /proc/mounts: {e}"))?;
        Ok(mount_table::parse_proc_mounts(&text))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let out = cmd::run_capture("mount", &[] as &[&str])?;
        Ok(mount_table::parse_mount_output(&out.stdout))
    }
}

/// Total and free bytes of the filesystem holding `path`.
pub fn space(path: &Path) -> Option<Space> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let frsize = stat.fragment_size() as u64;
    Some(Space {
        total: stat.blocks() as u64 * frsize,
        free: stat.blocks_available() as u64 * frsize,
    })
}

/// uid/gid that should own files on the mounted share.
///
/// Under `sudo` this is the invoking user, otherwise the current user.
pub fn owner_ids() -> (u32, u32) {
    let env_id = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u32>().ok());
    if nix::unistd::geteuid().is_root()
        && let (Some(uid), Some(gid)) = (env_id("SUDO_UID"), env_id("SUDO_GID"))
    {
        return (uid, gid);
    }
    (
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    )
}

/// Install hint for the CIFS mount helper.
pub fn cifs_utils_install_hint() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "sudo apt install cifs-utils"
    }
    #[cfg(not(target_os = "linux"))]
    {
        "CIFS mounts are supported on Linux only"
    }
}

/// Install hint for `smbclient`.
pub fn smbclient_install_hint() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "sudo apt install smbclient"
    }
    #[cfg(not(target_os = "linux"))]
    {
        "brew install samba"
    }
}
