//! Boot-time registration as a systemd oneshot unit that runs `auto-mount`.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::cmd;
use crate::config;
use crate::exit_codes;
use crate::progress;
use crate::retry::RetryPolicy;

pub const UNIT_NAME: &str = "nasmount.service";

/// Default directory for locally installed units.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Optional environment file the unit reads `SMB_PASSWORD` from.
pub const CREDENTIALS_ENV_FILE: &str = "/etc/nasmount/credentials.env";

/// Headroom added to the computed start timeout for the probe and systemd itself.
const START_TIMEOUT_MARGIN_SECS: u64 = 30;

/// Per-attempt allowance for ping + TCP probe.
const PROBE_ALLOWANCE_SECS: u64 = 10;

/// Unit directory: `NASMOUNT_UNIT_DIR` or `/etc/systemd/system`.
pub fn unit_dir() -> PathBuf {
    std::env::var_os("NASMOUNT_UNIT_DIR")
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_UNIT_DIR))
}

/// `TimeoutStartSec` covering every attempt, each mount bound, and the delays.
///
/// `None` when the mount call itself is unbounded (`mount_timeout_seconds: 0`).
pub fn start_timeout_secs(policy: &RetryPolicy, mount_timeout_secs: u64) -> Option<u64> {
    if mount_timeout_secs == 0 {
        return None;
    }
    let attempts = u64::from(policy.max_attempts.max(1));
    let per_attempt = mount_timeout_secs + PROBE_ALLOWANCE_SECS;
    Some(attempts * per_attempt + policy.total_delay().as_secs() + START_TIMEOUT_MARGIN_SECS)
}

/// Quote an `Exec*=` argument when it contains whitespace or quotes.
fn systemd_quote(arg: &str) -> String {
    if arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

pub fn render_unit(exe: &Path, config_path: &Path, start_timeout_secs: Option<u64>) -> String {
    let start_timeout = start_timeout_secs.map_or_else(|| "infinity".to_string(), |s| s.to_string());
    let exe = systemd_quote(&exe.to_string_lossy());
    let config = systemd_quote(&config_path.to_string_lossy());
    format!(
        "[Unit]\n\
         Description=Mount network storage share (nasmount)\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         RemainAfterExit=yes\n\
         EnvironmentFile=-{CREDENTIALS_ENV_FILE}\n\
         ExecStart={exe} --config {config} auto-mount\n\
         ExecStop=-{exe} --config {config} unmount\n\
         TimeoutStartSec={start_timeout}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotInstalled,
}

/// Write the unit into `unit_dir`, then reload and enable it.
///
/// `systemctl` runs one `systemctl` invocation.
pub fn install<F>(unit_dir: &Path, unit: &str, mut systemctl: F) -> Result<InstallOutcome, String>
where
    F: FnMut(&[&str]) -> Result<(), String>,
{
    let path = unit_dir.join(UNIT_NAME);
    let outcome = match std::fs::read_to_string(&path) {
        Ok(existing) if existing == unit => InstallOutcome::Unchanged,
        Ok(_) => InstallOutcome::Updated,
        Err(_) => InstallOutcome::Installed,
    };
    if outcome != InstallOutcome::Unchanged {
        write_unit(&path, unit)?;
        tracing::info!(path = %path.display(), ?outcome, "unit written");
    }
    systemctl(&["daemon-reload"])?;
    systemctl(&["enable", UNIT_NAME])?;
    Ok(outcome)
}

fn write_unit(path: &Path, unit: &str) -> Result<(), String> {
    let err = |e: std::io::Error| format!("cannot write {}: {e}", path.display());
    let dir = path
        .parent()
        .ok_or_else(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(dir).map_err(err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(err)?;
    tmp.write_all(unit.as_bytes()).map_err(err)?;
    tmp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o644))
        .map_err(err)?;
    tmp.persist(path).map_err(|e| err(e.error))?;
    Ok(())
}

/// Disable and delete the unit. An absent unit is nothing to do.
pub fn remove<F>(unit_dir: &Path, mut systemctl: F) -> Result<RemoveOutcome, String>
where
    F: FnMut(&[&str]) -> Result<(), String>,
{
    let path = unit_dir.join(UNIT_NAME);
    if !path.exists() {
        return Ok(RemoveOutcome::NotInstalled);
    }
    if let Err(e) = systemctl(&["disable", UNIT_NAME]) {
        tracing::warn!("systemctl disable failed: {e}");
    }
    std::fs::remove_file(&path).map_err(|e| format!("cannot remove {}: {e}", path.display()))?;
    systemctl(&["daemon-reload"])?;
    Ok(RemoveOutcome::Removed)
}

/// Run one `systemctl` invocation, failing on a non-zero exit.
fn systemctl(args: &[&str]) -> Result<(), String> {
    tracing::debug!("{}", cmd::display_cmd("systemctl", args));
    let out = cmd::run_capture("systemctl", args)?;
    if out.status == 0 {
        Ok(())
    } else {
        Err(format!(
            "systemctl {} failed (exit {}): {}",
            args.join(" "),
            out.status,
            out.stderr.trim()
        ))
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Run `nasmount setup-boot-mount`.
///
/// Returns the exit code that `main` should pass to `std::process::exit`.
pub fn run_setup_boot_mount(config_path: &Path) -> i32 {
    let cfg = match config::load(config_path).and_then(|cfg| cfg.require_enabled().map(|()| cfg)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e}");
            return crate::errors::OpError::from(e).exit_code();
        }
    };
    if !cfg.auto_mount_enabled {
        progress::warn(
            "auto_mount_enabled is false; the unit will start but skip the mount. \
             Enable it with: nasmount configure --auto-mount",
        );
    }
    if !cmd::which("systemctl") {
        eprintln!("systemctl not found; boot-time mounting needs systemd.");
        return exit_codes::PREREQ_NOT_FOUND;
    }
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("Error: cannot locate the nasmount executable: {e}");
            return exit_codes::RUNTIME_ERROR;
        }
    };
    let config_path = std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf());
    let timeout = start_timeout_secs(&RetryPolicy::default(), cfg.mount_timeout_seconds);
    let unit = render_unit(&exe, &config_path, timeout);

    let dir = unit_dir();
    progress::step(&format!("Installing {}...", dir.join(UNIT_NAME).display()));
    match install(&dir, &unit, systemctl) {
        Ok(InstallOutcome::Unchanged) => {
            println!("Boot mount already installed ({UNIT_NAME}).");
            exit_codes::SUCCESS
        }
        Ok(_) => {
            println!("Boot mount installed: {UNIT_NAME} runs `nasmount auto-mount` at startup.");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_codes::RUNTIME_ERROR
        }
    }
}

/// Run `nasmount remove-boot-mount`. An absent unit is success.
pub fn run_remove_boot_mount() -> i32 {
    let dir = unit_dir();
    match remove(&dir, systemctl) {
        Ok(RemoveOutcome::NotInstalled) => {
            println!("No boot mount installed. Nothing to do.");
            exit_codes::SUCCESS
        }
        Ok(RemoveOutcome::Removed) => {
            println!("Boot mount removed ({UNIT_NAME}).");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_codes::RUNTIME_ERROR
        }
    }
}
