//! In-memory mount facility and probe for exercising the controller, the
//! status reporter and the command layer without touching the real mount table.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use zeroize::Zeroizing;

use crate::cmd::CaptureOutput;
use crate::config::{ProtocolVersion, StorageConfig};
use crate::credentials::Credential;
use crate::mount_table::MountEntry;
use crate::platform::{MountFacility, ProcessInfo, UnmountMode};
use crate::probe::{PortState, Probe, ProbeResult, summarize};

/// An enabled configuration for `10.0.0.5/Media` mounted at `mount_point`.
pub fn enabled_config(mount_point: &Path) -> StorageConfig {
    StorageConfig {
        enabled: true,
        server_address: "10.0.0.5".to_string(),
        share_name: "Media".to_string(),
        username: "svc".to_string(),
        domain: None,
        mount_point: mount_point.to_path_buf(),
        protocol_version: ProtocolVersion::Negotiate,
        port: 445,
        mount_timeout_seconds: 30,
        auto_mount_enabled: true,
        extra_options: vec![],
    }
}

pub fn credential() -> Credential {
    Credential::new("svc", Zeroizing::new("s3cret".to_string()), None)
}

fn output(status: i32, stderr: &str) -> CaptureOutput {
    CaptureOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        status,
        timed_out: false,
    }
}

/// Scripted result of the next `mount` call. Unscripted calls succeed.
pub enum FakeMount {
    Succeed,
    Fail { status: i32, stderr: String },
    Timeout,
    /// Exit 0 without the share appearing in the table.
    SucceedWithoutEntry,
}

/// Scripted result of the next `umount` call. Unscripted calls succeed.
pub enum FakeUnmount {
    Succeed,
    Fail(&'static str),
    /// Exit 0 but leave the entry listed.
    SucceedWithoutRemoval,
}

/// What the fake saw of the credential file during a mount call.
pub struct SeenCredentialFile {
    pub path: PathBuf,
    pub existed_during_mount: bool,
    pub contents: String,
}

#[derive(Default)]
pub struct FakeFacility {
    table: RefCell<Vec<MountEntry>>,
    table_unreadable: Cell<bool>,
    mount_script: RefCell<VecDeque<FakeMount>>,
    unmount_script: RefCell<VecDeque<FakeUnmount>>,
    mount_calls: Cell<u32>,
    unmount_modes: RefCell<Vec<UnmountMode>>,
    credential_files: RefCell<Vec<SeenCredentialFile>>,
    holders: RefCell<Vec<ProcessInfo>>,
}

impl FakeFacility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&self, source: &str, target: &Path) {
        self.add_entry_with_options(source, target, &["rw"]);
    }

    pub fn add_entry_with_options(&self, source: &str, target: &Path, options: &[&str]) {
        self.table.borrow_mut().push(MountEntry {
            source: source.to_string(),
            target: target.to_string_lossy().into_owned(),
            fstype: "cifs".to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        });
    }

    pub fn set_table_unreadable(&self) {
        self.table_unreadable.set(true);
    }

    pub fn script_mount(&self, step: FakeMount) {
        self.mount_script.borrow_mut().push_back(step);
    }

    pub fn script_unmount(&self, step: FakeUnmount) {
        self.unmount_script.borrow_mut().push_back(step);
    }

    pub fn set_holders(&self, holders: Vec<ProcessInfo>) {
        *self.holders.borrow_mut() = holders;
    }

    pub fn mount_calls(&self) -> u32 {
        self.mount_calls.get()
    }

    pub fn unmount_modes(&self) -> Vec<UnmountMode> {
        self.unmount_modes.borrow().clone()
    }

    pub fn credential_files_seen(&self) -> std::cell::Ref<'_, Vec<SeenCredentialFile>> {
        self.credential_files.borrow()
    }

    pub fn entries_at(&self, target: &Path) -> usize {
        let target = target.to_string_lossy();
        self.table
            .borrow()
            .iter()
            .filter(|e| e.target == target)
            .count()
    }

    fn remove_entry(&self, target: &Path) {
        let target = target.to_string_lossy();
        let mut table = self.table.borrow_mut();
        if let Some(pos) = table.iter().rposition(|e| e.target == target) {
            table.remove(pos);
        }
    }
}

impl MountFacility for FakeFacility {
    fn mount_table(&self) -> Result<Vec<MountEntry>, String> {
        if self.table_unreadable.get() {
            return Err("Failed to read /proc/mounts: permission denied".to_string());
        }
        Ok(self.table.borrow().clone())
    }

    fn prepare_mount_point(&self, mount_point: &Path) -> Result<(), String> {
        std::fs::create_dir_all(mount_point).map_err(|e| e.to_string())
    }

    fn mount(&self, args: &[String], _timeout: Option<Duration>) -> Result<CaptureOutput, String> {
        self.mount_calls.set(self.mount_calls.get() + 1);
        let (source, target, options) = match args {
            [t, fstype, source, target, o, options] if t == "-t" && fstype == "cifs" && o == "-o" => {
                (source.clone(), target.clone(), options.clone())
            }
            _ => return Err(format!("unexpected mount arguments: {args:?}")),
        };
        if let Some(path) = options
            .split(',')
            .find_map(|o| o.strip_prefix("credentials="))
        {
            let path = PathBuf::from(path);
            let contents = std::fs::read_to_string(&path).unwrap_or_default();
            self.credential_files.borrow_mut().push(SeenCredentialFile {
                existed_during_mount: path.exists(),
                path,
                contents,
            });
        }

        let step = self
            .mount_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(FakeMount::Succeed);
        match step {
            FakeMount::Succeed => {
                self.table.borrow_mut().push(MountEntry {
                    source,
                    target,
                    fstype: "cifs".to_string(),
                    options: vec!["rw".to_string()],
                });
                Ok(output(0, ""))
            }
            FakeMount::SucceedWithoutEntry => Ok(output(0, "")),
            FakeMount::Fail { status, stderr } => Ok(output(status, &stderr)),
            FakeMount::Timeout => Ok(CaptureOutput {
                timed_out: true,
                ..output(124, "mount timed out after 30s")
            }),
        }
    }

    fn unmount(&self, mount_point: &Path, mode: UnmountMode) -> Result<CaptureOutput, String> {
        self.unmount_modes.borrow_mut().push(mode);
        let step = self
            .unmount_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(FakeUnmount::Succeed);
        match step {
            FakeUnmount::Succeed => {
                self.remove_entry(mount_point);
                Ok(output(0, ""))
            }
            FakeUnmount::SucceedWithoutRemoval => Ok(output(0, "")),
            FakeUnmount::Fail(stderr) => Ok(output(32, stderr)),
        }
    }

    fn processes_using(&self, _mount_point: &Path) -> Vec<ProcessInfo> {
        self.holders.borrow().clone()
    }
}

/// Probe with a fixed answer that counts its calls.
pub struct FakeProbe {
    ping_ok: bool,
    port: PortState,
    calls: Cell<u32>,
}

impl FakeProbe {
    pub fn reachable() -> Self {
        Self::with(true, PortState::Open)
    }

    pub fn unreachable() -> Self {
        Self::with(false, PortState::Silent("timed out".to_string()))
    }

    pub fn port_closed() -> Self {
        Self::with(true, PortState::Refused)
    }

    fn with(ping_ok: bool, port: PortState) -> Self {
        Self {
            ping_ok,
            port,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl Probe for FakeProbe {
    fn check(&self, cfg: &StorageConfig) -> ProbeResult {
        self.calls.set(self.calls.get() + 1);
        summarize(&cfg.server_address, cfg.port, self.ping_ok, &self.port)
    }
}
