use crate::probe::{ProbeResult, ScanHit, ShareInfo};
use crate::status::{MountState, ShareReport, StatusReport};

/// Human-readable byte count with binary units: `931.5 GiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn state_label(state: MountState) -> &'static str {
    match state {
        MountState::Unmounted => "unmounted",
        MountState::Mounted => "mounted",
        MountState::MountedDegraded => "mounted (degraded)",
        MountState::Unknown => "unknown",
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn space_line(total: Option<u64>, free: Option<u64>) -> Option<String> {
    let (total, free) = (total?, free?);
    Some(format!(
        "{} free of {} ({} used)",
        human_bytes(free),
        human_bytes(total),
        human_bytes(total.saturating_sub(free))
    ))
}

/// Format the `nasmount status` report.
pub fn format_status(report: &StatusReport) -> String {
    let mut lines = vec![
        format!("{:<12} {}", "STATE", state_label(report.state)),
        format!("{:<12} {}", "MOUNT POINT", report.mount_point.display()),
    ];
    if let Some(source) = &report.source {
        let fstype = report.fstype.as_deref().unwrap_or("?");
        lines.push(format!("{:<12} {source} ({fstype})", "SOURCE"));
    }
    if matches!(report.state, MountState::Mounted | MountState::MountedDegraded) {
        lines.push(format!("{:<12} {}", "READ", yes_no(report.read_access)));
        lines.push(format!("{:<12} {}", "WRITE", yes_no(report.write_access)));
    }
    if let Some(space) = space_line(report.space_total, report.space_free) {
        lines.push(format!("{:<12} {space}", "SPACE"));
    }
    if let Some(detail) = &report.detail {
        lines.push(format!("{:<12} {detail}", "NOTE"));
    }
    lines.join("\n")
}

/// Format the `nasmount shares` table.
///
/// Returns `"No network shares mounted."` when `shares` is empty.
pub fn format_shares_table(shares: &[ShareReport]) -> String {
    if shares.is_empty() {
        return "No network shares mounted.".to_string();
    }
    let header = format!(
        "{:<32} {:<28} {:<6} {:>11} {:>11}",
        "SOURCE", "MOUNT POINT", "TYPE", "SIZE", "FREE"
    );
    let mut lines = vec![header];
    for share in shares {
        let size = share.space_total.map(human_bytes).unwrap_or_else(|| "-".into());
        let free = share.space_free.map(human_bytes).unwrap_or_else(|| "-".into());
        let fstype = if share.read_only {
            format!("{} ro", share.fstype)
        } else {
            share.fstype.clone()
        };
        lines.push(format!(
            "{:<32} {:<28} {:<6} {:>11} {:>11}",
            share.source,
            share.mount_point.display(),
            fstype,
            size,
            free
        ));
    }
    lines.join("\n")
}

/// Format the `nasmount test-connectivity` report.
pub fn format_probe(result: &ProbeResult) -> String {
    let mark = |ok: bool| if ok { "\u{2713}" } else { "\u{2717}" };
    [
        format!("{} host {} reachable", mark(result.reachable), result.host),
        format!("{} ping", mark(result.ping_ok)),
        format!("{} port {} open", mark(result.port_open), result.port),
        format!("  {}", result.detail),
    ]
    .join("\n")
}

/// Format the share listing of `test-connectivity --list-shares`.
pub fn format_share_list(shares: &[ShareInfo]) -> String {
    if shares.is_empty() {
        return "No shares advertised.".to_string();
    }
    let mut lines = vec![format!("{:<24} {:<8} {}", "SHARE", "TYPE", "COMMENT")];
    for share in shares {
        lines.push(format!(
            "{:<24} {:<8} {}",
            share.name, share.kind, share.comment
        ));
    }
    lines.join("\n")
}

/// Format the `nasmount scan` result.
pub fn format_scan(hits: &[ScanHit]) -> String {
    if hits.is_empty() {
        return "No hosts responded.".to_string();
    }
    let mut lines = vec![format!("{:<16} {}", "ADDRESS", "SMB (445)")];
    for hit in hits {
        let smb = if hit.smb_open { "open" } else { "closed" };
        lines.push(format!("{:<16} {smb}", hit.address));
    }
    lines.join("\n")
}

/// A single prerequisite check result for `nasmount doctor`.
pub struct DoctorCheck {
    /// Short description of the check (e.g. `mount.cifs installed`).
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// On pass: optional version or note. On fail: optional fix hint.
    pub detail: Option<String>,
}

/// Format the full `nasmount doctor` report.
pub fn format_doctor_report(checks: &[DoctorCheck]) -> String {
    let mut lines = vec!["Checking prerequisites...".to_string()];
    let all_passed = checks.iter().all(|c| c.passed);

    for check in checks {
        if check.passed {
            let detail = check
                .detail
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            lines.push(format!("  \u{2713} {}{detail}", check.name));
        } else {
            lines.push(format!("  \u{2717} {}", check.name));
            if let Some(fix) = &check.detail {
                lines.push(format!("    Fix: {fix}"));
            }
        }
    }

    lines.push(String::new());
    if all_passed {
        lines.push("All checks passed.".to_string());
    } else {
        lines.push("Some checks failed.".to_string());
    }
    lines.join("\n")
}
