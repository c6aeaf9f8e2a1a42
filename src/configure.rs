//! `nasmount configure`: create or update the configuration file from flags.

use std::path::{Path, PathBuf};

use crate::config::{self, DEFAULT_MOUNT_TIMEOUT_SECS, DEFAULT_PORT, ProtocolVersion, StorageConfig};
use crate::errors::{ConfigError, OpError};
use crate::exit_codes;
use crate::progress;

/// Field updates requested on the command line. `None` keeps the current value.
#[derive(Debug, Default)]
pub struct ConfigChanges {
    pub server: Option<String>,
    pub share: Option<String>,
    pub username: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub domain: Option<String>,
    pub protocol: Option<ProtocolVersion>,
    pub port: Option<u16>,
    pub timeout: Option<u64>,
    /// Replaces `extra_options` when non-empty.
    pub options: Vec<String>,
    pub auto_mount: Option<bool>,
    pub disable: bool,
}

fn blank(mount_point: PathBuf) -> StorageConfig {
    StorageConfig {
        enabled: false,
        server_address: String::new(),
        share_name: String::new(),
        username: String::new(),
        domain: None,
        mount_point,
        protocol_version: ProtocolVersion::default(),
        port: DEFAULT_PORT,
        mount_timeout_seconds: DEFAULT_MOUNT_TIMEOUT_SECS,
        auto_mount_enabled: false,
        extra_options: Vec::new(),
    }
}

/// Apply `changes` on top of `current` (or a fresh record) and validate.
///
/// The result is enabled unless `changes.disable` is set. An empty `--domain`
/// clears the domain.
pub fn apply(
    current: Option<StorageConfig>,
    changes: ConfigChanges,
) -> Result<StorageConfig, ConfigError> {
    let mut cfg = match (current, changes.mount_point.clone()) {
        (Some(cfg), _) => cfg,
        (None, Some(mount_point)) => blank(mount_point),
        (None, None) => {
            return Err(ConfigError::Invalid(
                "--mount-point is required for a new configuration".to_string(),
            ));
        }
    };

    if let Some(server) = changes.server {
        cfg.server_address = server;
    }
    if let Some(share) = changes.share {
        cfg.share_name = share;
    }
    if let Some(username) = changes.username {
        cfg.username = username;
    }
    if let Some(mount_point) = changes.mount_point {
        cfg.mount_point = mount_point;
    }
    if let Some(domain) = changes.domain {
        cfg.domain = (!domain.trim().is_empty()).then_some(domain);
    }
    if let Some(protocol) = changes.protocol {
        cfg.protocol_version = protocol;
    }
    if let Some(port) = changes.port {
        cfg.port = port;
    }
    if let Some(timeout) = changes.timeout {
        cfg.mount_timeout_seconds = timeout;
    }
    if !changes.options.is_empty() {
        cfg.extra_options = changes.options;
    }
    if let Some(auto_mount) = changes.auto_mount {
        cfg.auto_mount_enabled = auto_mount;
    }
    cfg.enabled = !changes.disable;

    cfg.validate()?;
    Ok(cfg)
}

fn configure(config_path: &Path, changes: ConfigChanges) -> Result<StorageConfig, OpError> {
    let current = match config::load(config_path) {
        Ok(cfg) => Some(cfg),
        Err(ConfigError::MissingFile { .. }) => None,
        Err(e) => return Err(e.into()),
    };
    let cfg = apply(current, changes)?;
    config::save(config_path, &cfg)?;
    Ok(cfg)
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Run `nasmount configure`.
pub fn run_configure(config_path: &Path, changes: ConfigChanges) -> i32 {
    progress::step(&format!("Writing {}...", config_path.display()));
    match configure(config_path, changes) {
        Ok(cfg) => {
            let state = if cfg.enabled { "enabled" } else { "disabled" };
            println!(
                "Saved {}: {} at {} ({state}, auto-mount {}).",
                config_path.display(),
                cfg.source(),
                cfg.mount_point.display(),
                if cfg.auto_mount_enabled { "on" } else { "off" }
            );
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}
