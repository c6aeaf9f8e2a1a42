//! Mount/unmount/remount state machine over a [`MountFacility`].
//!
//! ```text
//! Idle -> Probing -> Mounting -> Mounted -> Unmounting -> Idle
//!            \           \
//!             `-> Failed  `-> Failed
//! ```
//!
//! `Failed` is terminal for one attempt; [`with_retry`] decides whether the
//! next attempt re-enters `Idle`.

use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::credentials::{Credential, CredentialFile};
use crate::errors::{MountError, OpError, UnmountError};
use crate::mount_table;
use crate::platform::{self, MountFacility, UnmountMode};
use crate::probe::Probe;
use crate::retry::{RetryError, RetryPolicy, with_retry};
use crate::signals::CancelToken;

/// Stderr fragments from `mount.cifs` or `sudo` that mean "credentials or rights".
const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "error(13)",
    "error(1)",
    "nt_status_logon_failure",
    "nt_status_access_denied",
    "a password is required",
    "only root can",
];

/// Fragments that mean the server or network may come back.
const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "host is down",
    "no route to host",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "resource temporarily unavailable",
    "error(110)",
    "error(111)",
    "error(112)",
    "error(113)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Probing,
    Mounting,
    Mounted,
    Unmounting,
    Failed { cancelled: bool },
}

/// Successful result of `mount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// The share was mounted by this call.
    Mounted,
    /// The configured share was already mounted; nothing was done.
    AlreadyMounted,
}

/// Successful result of `unmount`, by the escalation step that worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    Unmounted,
    Forced,
    /// Detached lazily; the kernel finishes once open files are closed.
    Deferred,
}

pub struct MountController<'a> {
    facility: &'a dyn MountFacility,
    probe: &'a dyn Probe,
    runtime_dir: PathBuf,
    owner: (u32, u32),
    state: ControllerState,
}

impl<'a> MountController<'a> {
    pub fn new(
        facility: &'a dyn MountFacility,
        probe: &'a dyn Probe,
        runtime_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            facility,
            probe,
            runtime_dir: runtime_dir.into(),
            owner: platform::owner_ids(),
            state: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    fn transition(&mut self, next: ControllerState) {
        tracing::debug!(from = ?self.state, to = ?next, "controller state");
        self.state = next;
    }

    fn fail(&mut self, err: MountError) -> Result<MountOutcome, MountError> {
        self.transition(ControllerState::Failed { cancelled: false });
        Err(err)
    }

    /// One mount attempt: table check, probe, OS mount, verification.
    pub fn mount(
        &mut self,
        cfg: &StorageConfig,
        cred: &Credential,
    ) -> Result<MountOutcome, MountError> {
        self.transition(ControllerState::Idle);
        let source = cfg.source();
        let table = match self.facility.mount_table() {
            Ok(table) => table,
            Err(e) => {
                return self.fail(MountError::MountFailed {
                    detail: format!("cannot read mount table: {e}"),
                    transient: false,
                });
            }
        };
        if let Some(entry) = mount_table::find_entry(&table, &cfg.mount_point) {
            if mount_table::same_source(&entry.source, &source) {
                tracing::info!(mount_point = %cfg.mount_point.display(), %source, "already mounted");
                self.transition(ControllerState::Mounted);
                return Ok(MountOutcome::AlreadyMounted);
            }
            return self.fail(MountError::AlreadyMounted {
                mount_point: cfg.mount_point.clone(),
                found: entry.source.clone(),
            });
        }

        self.transition(ControllerState::Probing);
        let probe = self.probe.check(cfg);
        if let Some(err) = probe.failure() {
            tracing::info!(detail = %probe.detail, "probe failed");
            return self.fail(err);
        }

        self.transition(ControllerState::Mounting);
        if let Err(detail) = self.facility.prepare_mount_point(&cfg.mount_point) {
            return self.fail(MountError::MountFailed {
                detail,
                transient: false,
            });
        }
        let cred_file = match CredentialFile::create(cred, &self.runtime_dir) {
            Ok(file) => file,
            Err(e) => return self.fail(e.into()),
        };
        let args = mount_args(cfg, cred_file.path(), self.owner);
        let result = self.facility.mount(&args, cfg.mount_timeout());
        drop(cred_file);

        let out = match result {
            Ok(out) => out,
            Err(detail) => {
                return self.fail(MountError::MountFailed {
                    detail,
                    transient: false,
                });
            }
        };
        if out.timed_out {
            return self.fail(MountError::MountFailed {
                detail: format!(
                    "mount did not finish within {}s",
                    cfg.mount_timeout_seconds
                ),
                transient: true,
            });
        }
        if out.status != 0 {
            return self.fail(classify_mount_failure(out.status, &out.stderr, &out.stdout));
        }

        if let Err(detail) = self.verify(cfg) {
            tracing::warn!(mount_point = %cfg.mount_point.display(), "verification failed, rolling back: {detail}");
            if let Err(e) = self.facility.unmount(&cfg.mount_point, UnmountMode::Lazy) {
                tracing::warn!("rollback unmount failed: {e}");
            }
            return self.fail(MountError::MountFailed {
                detail: format!("mount could not be verified: {detail}"),
                transient: true,
            });
        }

        tracing::info!(mount_point = %cfg.mount_point.display(), %source, "mounted");
        self.transition(ControllerState::Mounted);
        Ok(MountOutcome::Mounted)
    }

    /// Confirm the share is listed at the mount point and its root is readable.
    fn verify(&self, cfg: &StorageConfig) -> Result<(), String> {
        let table = self.facility.mount_table()?;
        let entry = mount_table::find_entry(&table, &cfg.mount_point)
            .ok_or_else(|| format!("{} is not in the mount table", cfg.mount_point.display()))?;
        if !mount_table::same_source(&entry.source, &cfg.source()) {
            return Err(format!("{} shows source {}", cfg.mount_point.display(), entry.source));
        }
        std::fs::read_dir(&cfg.mount_point)
            .map(|_| ())
            .map_err(|e| format!("cannot list {}: {e}", cfg.mount_point.display()))
    }

    /// Mount with bounded retries. Cancellation leaves `Failed { cancelled: true }`.
    pub fn mount_with_retry(
        &mut self,
        cfg: &StorageConfig,
        cred: &Credential,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<MountOutcome, RetryError<MountError>> {
        let result = with_retry(policy, cancel, |attempt| {
            tracing::debug!(attempt, "mount attempt");
            self.mount(cfg, cred)
        });
        if let Err(RetryError::Cancelled { .. }) = &result {
            self.transition(ControllerState::Failed { cancelled: true });
        }
        result
    }

    /// Take the mount down: graceful, then forced, then lazy.
    ///
    /// An unmounted point yields `NotMounted` without any OS unmount call.
    pub fn unmount(&mut self, mount_point: &Path) -> Result<UnmountOutcome, UnmountError> {
        let table = self
            .facility
            .mount_table()
            .map_err(|e| UnmountError::Failed {
                detail: format!("cannot read mount table: {e}"),
            })?;
        if mount_table::find_entry(&table, mount_point).is_none() {
            self.transition(ControllerState::Idle);
            return Err(UnmountError::NotMounted {
                mount_point: mount_point.to_path_buf(),
            });
        }

        self.transition(ControllerState::Unmounting);
        let steps = [
            (UnmountMode::Graceful, UnmountOutcome::Unmounted),
            (UnmountMode::Force, UnmountOutcome::Forced),
            (UnmountMode::Lazy, UnmountOutcome::Deferred),
        ];
        let mut failures = Vec::new();
        for (mode, outcome) in steps {
            let detail = match self.facility.unmount(mount_point, mode) {
                Ok(out) if out.status == 0 && !self.still_listed(mount_point) => {
                    tracing::info!(mount_point = %mount_point.display(), ?mode, "unmounted");
                    self.transition(ControllerState::Idle);
                    return Ok(outcome);
                }
                Ok(out) if out.status == 0 => "still listed in the mount table".to_string(),
                Ok(out) => first_line(&out.stderr, &out.stdout)
                    .unwrap_or_else(|| format!("umount exited with status {}", out.status)),
                Err(e) => e,
            };
            tracing::warn!(mount_point = %mount_point.display(), ?mode, "unmount step failed: {detail}");
            failures.push(detail);
        }

        let holders = self.facility.processes_using(mount_point);
        let mut detail = failures.join("; ");
        self.transition(ControllerState::Mounted);
        let busy = !holders.is_empty() || detail.to_ascii_lowercase().contains("busy");
        if busy {
            if !holders.is_empty() {
                let names: Vec<String> = holders
                    .iter()
                    .map(|p| format!("{} (pid {})", p.name, p.pid))
                    .collect();
                detail.push_str(&format!("; in use by {}", names.join(", ")));
            }
            Err(UnmountError::Busy {
                mount_point: mount_point.to_path_buf(),
                detail,
            })
        } else {
            Err(UnmountError::Failed { detail })
        }
    }

    fn still_listed(&self, mount_point: &Path) -> bool {
        match self.facility.mount_table() {
            Ok(table) => mount_table::find_entry(&table, mount_point).is_some(),
            Err(e) => {
                tracing::debug!("cannot re-read mount table: {e}");
                false
            }
        }
    }

    /// Unmount (tolerating `NotMounted`), then mount with retries.
    pub fn remount(
        &mut self,
        cfg: &StorageConfig,
        cred: &Credential,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<MountOutcome, OpError> {
        match self.unmount(&cfg.mount_point) {
            Ok(outcome) => tracing::debug!(?outcome, "remount: unmounted"),
            Err(UnmountError::NotMounted { .. }) => tracing::debug!("remount: nothing to unmount"),
            Err(e) => return Err(e.into()),
        }
        Ok(self.mount_with_retry(cfg, cred, policy, cancel)?)
    }
}

/// `-o` option string for `mount -t cifs`. Carries no secret, only the
/// credential file path.
pub fn mount_options(cfg: &StorageConfig, credential_file: &Path, owner: (u32, u32)) -> String {
    let (uid, gid) = owner;
    let mut opts = vec![
        format!("credentials={}", credential_file.display()),
        format!("uid={uid}"),
        format!("gid={gid}"),
        "iocharset=utf8".to_string(),
        format!("port={}", cfg.port),
    ];
    if let Some(vers) = cfg.protocol_version.mount_option() {
        opts.push(format!("vers={vers}"));
    }
    opts.extend(cfg.extra_options.iter().cloned());
    opts.join(",")
}

/// Full argument list for `mount`.
pub fn mount_args(cfg: &StorageConfig, credential_file: &Path, owner: (u32, u32)) -> Vec<String> {
    vec![
        "-t".to_string(),
        "cifs".to_string(),
        cfg.source(),
        cfg.mount_point.to_string_lossy().into_owned(),
        "-o".to_string(),
        mount_options(cfg, credential_file, owner),
    ]
}

/// Map a failed `mount` run to an error kind.
pub fn classify_mount_failure(status: i32, stderr: &str, stdout: &str) -> MountError {
    let detail = first_line(stderr, stdout)
        .unwrap_or_else(|| format!("mount exited with status {status}"));
    let text = format!("{stderr}\n{stdout}").to_ascii_lowercase();
    if PERMISSION_MARKERS.iter().any(|m| text.contains(m)) {
        MountError::PermissionDenied { detail }
    } else {
        let transient = TRANSIENT_MARKERS.iter().any(|m| text.contains(m));
        MountError::MountFailed { detail, transient }
    }
}

fn first_line(stderr: &str, stdout: &str) -> Option<String> {
    stderr
        .lines()
        .chain(stdout.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
