//! `mount`, `unmount`, `remount` and `auto-mount`: the guarded commands that
//! change the mount table.

use std::path::{Path, PathBuf};
use std::time::Duration;

use zeroize::Zeroizing;

use crate::config::{self, StorageConfig};
use crate::controller::{MountController, MountOutcome, UnmountOutcome};
use crate::credentials::{self, Credential};
use crate::errors::OpError;
use crate::exit_codes;
use crate::guard::{ConcurrencyGuard, Lease};
use crate::naming;
use crate::platform::SystemFacility;
use crate::probe::NetworkProbe;
use crate::progress;
use crate::retry::RetryPolicy;
use crate::signals;

// ── Pure functions ────────────────────────────────────────────────────────────

/// Why `auto-mount` has nothing to do, or `None` when it should mount.
///
/// `--force` bypasses `auto_mount_enabled`; a disabled configuration is then
/// rejected by the mount itself.
pub fn auto_mount_skip_reason(cfg: &StorageConfig, force: bool) -> Option<&'static str> {
    if force {
        return None;
    }
    if !cfg.enabled {
        Some("Network storage is disabled. Nothing to do.")
    } else if !cfg.auto_mount_enabled {
        Some("Auto-mount is disabled. Nothing to do.")
    } else {
        None
    }
}

pub fn mount_message(outcome: MountOutcome, cfg: &StorageConfig) -> String {
    match outcome {
        MountOutcome::Mounted => format!(
            "Mounted {} at {}.",
            cfg.source(),
            cfg.mount_point.display()
        ),
        MountOutcome::AlreadyMounted => format!(
            "{} is already mounted at {}. Nothing to do.",
            cfg.source(),
            cfg.mount_point.display()
        ),
    }
}

pub fn unmount_message(outcome: UnmountOutcome, mount_point: &Path) -> String {
    match outcome {
        UnmountOutcome::Unmounted => format!("Unmounted {}.", mount_point.display()),
        UnmountOutcome::Forced => format!("Unmounted {} (forced).", mount_point.display()),
        UnmountOutcome::Deferred => format!(
            "Detached {}; it will be released once no process uses it.",
            mount_point.display()
        ),
    }
}

pub fn retry_policy(attempts: u32, delay_secs: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts: attempts.max(1),
        base_delay: Duration::from_secs(delay_secs),
    }
}

// ── Shared steps ──────────────────────────────────────────────────────────────

/// Exit code for a finished command; errors go to stderr.
fn finish(result: Result<String, OpError>) -> i32 {
    match result {
        Ok(msg) => {
            println!("{msg}");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

fn load_enabled(config_path: &Path) -> Result<StorageConfig, OpError> {
    let cfg = config::load(config_path)?;
    cfg.require_enabled()?;
    Ok(cfg)
}

fn resolve_credential(cfg: &StorageConfig, password_stdin: bool) -> Result<Credential, OpError> {
    let supplied: Option<Zeroizing<String>> = if password_stdin {
        Some(credentials::read_password_stdin()?)
    } else {
        None
    };
    Ok(credentials::resolve(cfg, supplied)?)
}

/// Take the per-mount-point lease and clear credential files left by killed runs.
fn lease(cfg: &StorageConfig) -> Result<(PathBuf, Lease), OpError> {
    let lease = ConcurrencyGuard::new(naming::lock_dir()).acquire(&cfg.mount_point)?;
    tracing::debug!(lock = %lease.path().display(), "holding lease");
    let runtime_dir = naming::runtime_dir();
    let swept = credentials::sweep_stale(&runtime_dir);
    if swept > 0 {
        tracing::info!(count = swept, "removed stale credential files");
    }
    Ok((runtime_dir, lease))
}

fn mount_guarded(
    cfg: &StorageConfig,
    cred: &Credential,
    policy: &RetryPolicy,
) -> Result<MountOutcome, OpError> {
    let cancel = signals::cancel_on_signals();
    let (runtime_dir, _lease) = lease(cfg)?;
    let facility = SystemFacility::new();
    let probe = NetworkProbe::default();
    let mut controller = MountController::new(&facility, &probe, runtime_dir);
    let result = controller.mount_with_retry(cfg, cred, policy, &cancel);
    tracing::debug!(state = ?controller.state(), "controller finished");
    if let Err(e) = &result {
        tracing::info!(attempts = e.attempts(), "mount gave up");
    }
    Ok(result?)
}

fn mount(config_path: &Path, password_stdin: bool) -> Result<String, OpError> {
    let cfg = load_enabled(config_path)?;
    let cred = resolve_credential(&cfg, password_stdin)?;
    progress::step(&format!(
        "Mounting {} at {}...",
        cfg.source(),
        cfg.mount_point.display()
    ));
    let outcome = mount_guarded(&cfg, &cred, &RetryPolicy::once())?;
    Ok(mount_message(outcome, &cfg))
}

fn unmount(config_path: &Path) -> Result<String, OpError> {
    let cfg = config::load(config_path)?;
    let (runtime_dir, _lease) = lease(&cfg)?;
    progress::step(&format!("Unmounting {}...", cfg.mount_point.display()));
    let facility = SystemFacility::new();
    let probe = NetworkProbe::default();
    let mut controller = MountController::new(&facility, &probe, runtime_dir);
    let outcome = controller.unmount(&cfg.mount_point)?;
    Ok(unmount_message(outcome, &cfg.mount_point))
}

fn remount(
    config_path: &Path,
    password_stdin: bool,
    policy: &RetryPolicy,
) -> Result<String, OpError> {
    let cfg = load_enabled(config_path)?;
    let cred = resolve_credential(&cfg, password_stdin)?;
    let cancel = signals::cancel_on_signals();
    let (runtime_dir, _lease) = lease(&cfg)?;
    progress::step(&format!("Remounting {}...", cfg.mount_point.display()));
    let facility = SystemFacility::new();
    let probe = NetworkProbe::default();
    let mut controller = MountController::new(&facility, &probe, runtime_dir);
    let outcome = controller.remount(&cfg, &cred, policy, &cancel)?;
    Ok(mount_message(outcome, &cfg))
}

fn auto_mount(config_path: &Path, force: bool, policy: &RetryPolicy) -> Result<String, OpError> {
    let cfg = config::load(config_path)?;
    if let Some(reason) = auto_mount_skip_reason(&cfg, force) {
        tracing::info!("auto-mount skipped: {reason}");
        return Ok(reason.to_string());
    }
    cfg.require_enabled()?;
    let cred = credentials::resolve(&cfg, None)?;
    progress::step(&format!(
        "Mounting {} at {} (up to {} attempts)...",
        cfg.source(),
        cfg.mount_point.display(),
        policy.max_attempts
    ));
    let outcome = mount_guarded(&cfg, &cred, policy)?;
    Ok(mount_message(outcome, &cfg))
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Run `nasmount mount`: one guarded attempt.
pub fn run_mount(config_path: &Path, password_stdin: bool) -> i32 {
    finish(mount(config_path, password_stdin))
}

/// Run `nasmount unmount`. A disabled configuration can still be unmounted.
pub fn run_unmount(config_path: &Path) -> i32 {
    finish(unmount(config_path))
}

/// Run `nasmount remount`: unmount if mounted, then mount with retries.
pub fn run_remount(config_path: &Path, password_stdin: bool, attempts: u32, delay: u64) -> i32 {
    finish(remount(
        config_path,
        password_stdin,
        &retry_policy(attempts, delay),
    ))
}

/// Run `nasmount auto-mount`, the boot-time entry point.
///
/// Returns the exit code that `main` should pass to `std::process::exit`.
pub fn run_auto_mount(config_path: &Path, force: bool, attempts: u32, delay: u64) -> i32 {
    finish(auto_mount(config_path, force, &retry_policy(attempts, delay)))
}
