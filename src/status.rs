//! Read-only status of the configured mount point and of every mounted share.
//!
//! Nothing here takes the operation lock or mutates the mount table.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{self, StorageConfig};
use crate::errors::OpError;
use crate::exit_codes;
use crate::format;
use crate::mount_table::{self, MountEntry};
use crate::naming::WRITE_TEST_PREFIX;
use crate::platform::{self, MountFacility, SystemFacility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MountState {
    Unmounted,
    Mounted,
    /// Listed but read-only, unreadable, or not writable.
    MountedDegraded,
    /// The mount table could not be read.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state: MountState,
    pub mount_point: PathBuf,
    pub source: Option<String>,
    pub fstype: Option<String>,
    pub read_access: bool,
    pub write_access: bool,
    pub space_total: Option<u64>,
    pub space_free: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusReport {
    fn empty(state: MountState, mount_point: &Path) -> Self {
        Self {
            state,
            mount_point: mount_point.to_path_buf(),
            source: None,
            fstype: None,
            read_access: false,
            write_access: false,
            space_total: None,
            space_free: None,
            detail: None,
        }
    }
}

/// Compute the state of `cfg.mount_point` on demand.
pub fn status(facility: &dyn MountFacility, cfg: &StorageConfig) -> StatusReport {
    let mount_point = cfg.mount_point.as_path();
    let table = match facility.mount_table() {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("cannot read mount table: {e}");
            return StatusReport {
                detail: Some(e),
                ..StatusReport::empty(MountState::Unknown, mount_point)
            };
        }
    };
    let Some(entry) = mount_table::find_entry(&table, mount_point) else {
        return StatusReport::empty(MountState::Unmounted, mount_point);
    };
    inspect(entry, mount_point)
}

fn inspect(entry: &MountEntry, mount_point: &Path) -> StatusReport {
    let mut report = StatusReport {
        source: Some(entry.source.clone()),
        fstype: Some(entry.fstype.clone()),
        ..StatusReport::empty(MountState::Mounted, mount_point)
    };

    match std::fs::read_dir(mount_point) {
        Ok(_) => report.read_access = true,
        Err(e) => report.detail = Some(format!("cannot list {}: {e}", mount_point.display())),
    }
    if report.read_access {
        if entry.is_read_only() {
            report.detail = Some("mounted read-only".to_string());
        } else {
            match write_probe(mount_point) {
                Ok(()) => report.write_access = true,
                Err(e) => {
                    report.detail = Some(format!("cannot write to {}: {e}", mount_point.display()))
                }
            }
        }
    }
    if !(report.read_access && report.write_access) {
        report.state = MountState::MountedDegraded;
    }

    if let Some(space) = platform::space(mount_point) {
        report.space_total = Some(space.total);
        report.space_free = Some(space.free);
    }
    report
}

/// Create and remove a marker file inside `dir`.
fn write_probe(dir: &Path) -> std::io::Result<()> {
    let marker = dir.join(format!("{WRITE_TEST_PREFIX}{}", std::process::id()));
    let result = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
        .and_then(|mut f| f.write_all(b"ok"));
    let removed = std::fs::remove_file(&marker);
    result?;
    removed
}

/// A mounted SMB/CIFS share, as listed by `shares`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareReport {
    pub source: String,
    pub mount_point: PathBuf,
    pub fstype: String,
    pub read_only: bool,
    pub space_total: Option<u64>,
    pub space_free: Option<u64>,
}

/// Every SMB/CIFS share in the mount table with its space usage.
pub fn shares(facility: &dyn MountFacility) -> Result<Vec<ShareReport>, String> {
    let table = facility.mount_table()?;
    Ok(table
        .iter()
        .filter(|e| e.is_network_share())
        .map(|e| {
            let mount_point = PathBuf::from(&e.target);
            let space = platform::space(&mount_point);
            ShareReport {
                source: e.source.clone(),
                fstype: e.fstype.clone(),
                read_only: e.is_read_only(),
                space_total: space.map(|s| s.total),
                space_free: space.map(|s| s.free),
                mount_point,
            }
        })
        .collect())
}

/// Print `value` as pretty JSON, or `text` when `json` is false.
fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> i32 {
    if !json {
        println!("{}", text(value));
        return exit_codes::SUCCESS;
    }
    match serde_json::to_string_pretty(value) {
        Ok(out) => {
            println!("{out}");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: cannot encode JSON: {e}");
            exit_codes::RUNTIME_ERROR
        }
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Run `nasmount status`. Never takes the operation lock.
pub fn run_status(config_path: &Path, json: bool) -> i32 {
    let cfg = match config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e}");
            return OpError::from(e).exit_code();
        }
    };
    let report = status(&SystemFacility::new(), &cfg);
    emit(json, &report, format::format_status)
}

/// Run `nasmount shares`.
pub fn run_shares(json: bool) -> i32 {
    match shares(&SystemFacility::new()) {
        Ok(list) => emit(json, &list, |list| format::format_shares_table(list)),
        Err(e) => {
            eprintln!("Error: {e}");
            exit_codes::RUNTIME_ERROR
        }
    }
}
