//! `test-connectivity` and `scan`: read-only network checks. Neither takes
//! the operation lock.

use std::path::Path;

use zeroize::Zeroizing;

use crate::config::{self, StorageConfig};
use crate::credentials::{self, CredentialFile};
use crate::errors::{CredentialError, OpError};
use crate::exit_codes;
use crate::format;
use crate::naming;
use crate::probe::{self, NetworkProbe, Probe, ProbeResult, ShareInfo};
use crate::progress;
use crate::signals;

/// Exit code for a probe result: success, or the code of the error it gates on.
pub fn probe_exit_code(result: &ProbeResult) -> i32 {
    result
        .failure()
        .map(|e| e.exit_code())
        .unwrap_or(exit_codes::SUCCESS)
}

/// List shares, authenticating when a password is available and anonymously otherwise.
fn shares_for(cfg: &StorageConfig, password_stdin: bool) -> Result<Vec<ShareInfo>, OpError> {
    let supplied: Option<Zeroizing<String>> = if password_stdin {
        Some(credentials::read_password_stdin()?)
    } else {
        None
    };
    match credentials::resolve(cfg, supplied) {
        Ok(cred) => {
            let dir = naming::runtime_dir();
            let file = CredentialFile::create(&cred, &dir)?;
            probe::list_shares(cfg, Some(file.path())).map_err(OpError::Runtime)
        }
        Err(CredentialError::Unavailable(why)) => {
            tracing::info!("listing shares anonymously: {why}");
            probe::list_shares(cfg, None).map_err(OpError::Runtime)
        }
        Err(e) => Err(e.into()),
    }
}

fn load_configured(config_path: &Path) -> Result<StorageConfig, OpError> {
    let cfg = config::load(config_path)?;
    cfg.require_enabled()?;
    Ok(cfg)
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Run `nasmount test-connectivity`.
///
/// Exits with the `Unreachable`/`PortClosed` code when the check fails.
pub fn run_test_connectivity(config_path: &Path, list_shares: bool, password_stdin: bool) -> i32 {
    let cfg = match load_configured(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {e}");
            return e.exit_code();
        }
    };
    progress::step(&format!(
        "Checking {}:{}...",
        cfg.server_address, cfg.port
    ));
    let result = NetworkProbe::default().check(&cfg);
    println!("{}", format::format_probe(&result));
    let code = probe_exit_code(&result);
    if code != exit_codes::SUCCESS || !list_shares {
        return code;
    }

    progress::step(&format!("Listing shares on {}...", cfg.server_address));
    match shares_for(&cfg, password_stdin) {
        Ok(shares) => {
            println!("{}", format::format_share_list(&shares));
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if !crate::cmd::which("smbclient") {
                eprintln!("{}", crate::platform::smbclient_install_hint());
                return exit_codes::PREREQ_NOT_FOUND;
            }
            e.exit_code()
        }
    }
}

/// Run `nasmount scan [CIDR]`. Ctrl+C stops the sweep and prints what was found.
pub fn run_scan(cidr: &str) -> i32 {
    if let Err(e) = probe::parse_cidr(cidr) {
        eprintln!("Error: {e}");
        return exit_codes::USAGE_ERROR;
    }
    let cancel = signals::cancel_on_signals();
    progress::step(&format!("Scanning {cidr}..."));
    match probe::scan(cidr, &cancel) {
        Ok(hits) => {
            println!("{}", format::format_scan(&hits));
            if cancel.is_cancelled() {
                eprintln!("Scan interrupted; results are partial.");
                return exit_codes::CANCELLED;
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_codes::RUNTIME_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{PortState, summarize};

    #[test]
    fn open_port_is_success() {
        let result = summarize("10.0.0.5", 445, true, &PortState::Open);
        assert_eq!(probe_exit_code(&result), exit_codes::SUCCESS);
    }

    #[test]
    fn refused_port_is_port_closed() {
        let result = summarize("10.0.0.5", 445, false, &PortState::Refused);
        assert_eq!(probe_exit_code(&result), exit_codes::PORT_CLOSED);
    }

    #[test]
    fn silent_host_is_unreachable() {
        let result = summarize(
            "10.0.0.5",
            445,
            false,
            &PortState::Silent("timed out".to_string()),
        );
        assert_eq!(probe_exit_code(&result), exit_codes::UNREACHABLE);
    }

    #[test]
    fn disabled_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.yaml");
        std::fs::write(&path, "mount_point: /mnt/nas\n").unwrap();
        let err = load_configured(&path).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::CONFIG_INVALID);
    }
}
