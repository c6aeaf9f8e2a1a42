use std::path::Path;

use crate::cmd;
use crate::config;
use crate::exit_codes;
use crate::format::DoctorCheck;
use crate::naming;
use crate::platform;
use crate::progress;

/// Extract the first version-like token (`MAJOR.MINOR[.PATCH...]`) from `output`.
///
/// Strips a leading `v` and trailing punctuation before matching. Returns `None`
/// if no token with at least two dot-separated numeric parts is found.
pub fn parse_version_str(output: &str) -> Option<String> {
    for word in output.split_whitespace() {
        let w = word
            .trim_start_matches('v')
            .trim_end_matches([',', ';', '.', ')'].as_slice());
        let parts: Vec<&str> = w.split('.').collect();
        if parts.len() >= 2
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        {
            return Some(w.to_string());
        }
    }
    None
}

fn tool_check(name: &str, prog: &str, version_args: &[&str], hint: &str) -> DoctorCheck {
    if !cmd::which(prog) {
        return DoctorCheck {
            name: name.to_string(),
            passed: false,
            detail: Some(hint.to_string()),
        };
    }
    let version = cmd::run_capture(prog, version_args)
        .ok()
        .and_then(|out| parse_version_str(&out.stdout).or_else(|| parse_version_str(&out.stderr)));
    DoctorCheck {
        name: name.to_string(),
        passed: true,
        detail: version,
    }
}

pub fn check_mount_cifs() -> DoctorCheck {
    tool_check(
        "mount.cifs installed",
        "mount.cifs",
        &["-V"],
        platform::cifs_utils_install_hint(),
    )
}

pub fn check_smbclient() -> DoctorCheck {
    tool_check(
        "smbclient installed (share listing)",
        "smbclient",
        &["--version"],
        platform::smbclient_install_hint(),
    )
}

pub fn check_umount() -> DoctorCheck {
    DoctorCheck {
        name: "umount available".to_string(),
        passed: cmd::which("umount"),
        detail: None,
    }
}

/// Root needs nothing; everyone else needs passwordless `sudo` for mount/umount.
pub fn check_privileges() -> DoctorCheck {
    let name = "mount privileges".to_string();
    if nix::unistd::geteuid().is_root() {
        return DoctorCheck {
            name,
            passed: true,
            detail: Some("running as root".to_string()),
        };
    }
    let ok = cmd::run_capture("sudo", &["-n", "true"])
        .map(|out| out.status == 0)
        .unwrap_or(false);
    DoctorCheck {
        name,
        passed: ok,
        detail: if ok {
            Some("passwordless sudo".to_string())
        } else {
            Some("run as root or allow passwordless sudo for mount and umount".to_string())
        },
    }
}

pub fn check_config(path: &Path) -> DoctorCheck {
    let name = format!("configuration {} valid", path.display());
    match config::load(path) {
        Ok(cfg) if cfg.enabled => DoctorCheck {
            name,
            passed: true,
            detail: Some(cfg.source()),
        },
        Ok(_) => DoctorCheck {
            name,
            passed: true,
            detail: Some("storage disabled".to_string()),
        },
        Err(e) => DoctorCheck {
            name,
            passed: false,
            detail: Some(format!("{e}; run: nasmount configure --help")),
        },
    }
}

pub fn check_runtime_dir(dir: &Path) -> DoctorCheck {
    let name = format!("runtime directory {} writable", dir.display());
    let result = naming::ensure_private_dir(dir).and_then(|()| {
        tempfile::Builder::new()
            .prefix(".doctor-")
            .tempfile_in(dir)
            .map(drop)
    });
    match result {
        Ok(()) => DoctorCheck {
            name,
            passed: true,
            detail: None,
        },
        Err(e) => DoctorCheck {
            name,
            passed: false,
            detail: Some(format!("{e}; set NASMOUNT_RUNTIME_DIR to a writable directory")),
        },
    }
}

pub fn check_lock_dir(dir: &Path) -> DoctorCheck {
    let name = format!("lock directory {} writable", dir.display());
    let result = naming::ensure_shared_dir(dir).and_then(|()| {
        tempfile::Builder::new()
            .prefix(".doctor-")
            .tempfile_in(dir)
            .map(drop)
    });
    match result {
        Ok(()) => DoctorCheck {
            name,
            passed: true,
            detail: None,
        },
        Err(e) => DoctorCheck {
            name,
            passed: false,
            detail: Some(format!("{e}; set NASMOUNT_LOCK_DIR to a directory shared by all users")),
        },
    }
}

/// Run all prerequisite checks, print the report, and return an exit code.
///
/// Returns `exit_codes::SUCCESS` (0) if all checks pass, `exit_codes::RUNTIME_ERROR` (1)
/// if any check fails.
pub fn run_doctor(config_path: &Path) -> i32 {
    progress::step("Running prerequisite checks...");
    let checks = vec![
        check_mount_cifs(),
        check_umount(),
        check_smbclient(),
        check_privileges(),
        check_config(config_path),
        check_runtime_dir(&naming::runtime_dir()),
        check_lock_dir(&naming::lock_dir()),
    ];
    let all_passed = checks.iter().all(|c| c.passed);
    let report = crate::format::format_doctor_report(&checks);
    println!("{report}");
    if all_passed {
        exit_codes::SUCCESS
    } else {
        exit_codes::RUNTIME_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- parse_version_str ---

    #[test]
    fn parse_version_basic() {
        assert_eq!(parse_version_str("mount.cifs version: 7.0"), Some("7.0".to_string()));
    }

    #[test]
    fn parse_version_with_v_prefix() {
        assert_eq!(parse_version_str("v4.17.12"), Some("4.17.12".to_string()));
    }

    #[test]
    fn parse_version_smbclient_style() {
        assert_eq!(
            parse_version_str("Version 4.17.12-Debian"),
            None,
            "distribution suffix is not a plain version"
        );
        assert_eq!(parse_version_str("Version 4.17.12"), Some("4.17.12".to_string()));
    }

    #[test]
    fn parse_version_empty_input() {
        assert_eq!(parse_version_str(""), None);
    }

    #[test]
    fn parse_version_ignores_single_number() {
        assert_eq!(parse_version_str("42"), None);
    }

    #[test]
    fn parse_version_trailing_punctuation_stripped() {
        assert_eq!(parse_version_str("(version 2.1)"), Some("2.1".to_string()));
    }

    // --- check_config ---

    #[test]
    fn check_config_missing_file_fails_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let check = check_config(&dir.path().join("storage.yaml"));
        assert!(!check.passed);
        let detail = check.detail.unwrap();
        assert!(detail.contains("MissingFile"), "got: {detail}");
        assert!(detail.contains("configure"));
    }

    #[test]
    fn check_config_valid_file_passes_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.yaml");
        std::fs::write(
            &path,
            "enabled: true\nserver_address: nas\nshare_name: Media\nusername: svc\nmount_point: /mnt/nas\n",
        )
        .unwrap();
        let check = check_config(&path);
        assert!(check.passed);
        assert_eq!(check.detail.as_deref(), Some("//nas/Media"));
    }

    #[test]
    fn check_config_disabled_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.yaml");
        std::fs::write(&path, "mount_point: /mnt/nas\n").unwrap();
        let check = check_config(&path);
        assert!(check.passed);
        assert_eq!(check.detail.as_deref(), Some("storage disabled"));
    }

    // --- check_runtime_dir ---

    #[test]
    fn check_runtime_dir_creates_and_passes() {
        let dir = tempfile::tempdir().unwrap();
        let rt = dir.path().join("rt");
        let check = check_runtime_dir(&rt);
        assert!(check.passed);
        assert!(rt.is_dir());
        assert_eq!(std::fs::read_dir(&rt).unwrap().count(), 0);
    }

    #[test]
    fn check_runtime_dir_fails_under_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        let check = check_runtime_dir(&file.join("rt"));
        assert!(!check.passed);
        assert!(check.detail.unwrap().contains("NASMOUNT_RUNTIME_DIR"));
    }

    // --- check_lock_dir ---

    #[test]
    fn check_lock_dir_creates_and_passes() {
        let dir = tempfile::tempdir().unwrap();
        let locks = dir.path().join("locks");
        let check = check_lock_dir(&locks);
        assert!(check.passed);
        assert!(locks.is_dir());
    }

    #[test]
    fn check_lock_dir_fails_under_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        let check = check_lock_dir(&file.join("locks"));
        assert!(!check.passed);
        assert!(check.detail.unwrap().contains("NASMOUNT_LOCK_DIR"));
    }
}
