//! Storage configuration record: load, validate, save.
//!
//! The record is read at the start of every operation and passed by reference
//! into each component. Nothing in the mount manager mutates it.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nasmount/storage.yaml";

/// Default SMB port.
pub const DEFAULT_PORT: u16 = 445;

/// Default bound on the OS mount call.
pub const DEFAULT_MOUNT_TIMEOUT_SECS: u64 = 30;

/// SMB dialect requested from the kernel client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Let client and server negotiate (no `vers=` option).
    #[default]
    #[serde(rename = "negotiate")]
    Negotiate,
    #[serde(rename = "2.0")]
    V2,
    #[serde(rename = "3.0")]
    V3,
}

impl ProtocolVersion {
    /// Value for the `vers=` mount option, or `None` to negotiate.
    pub fn mount_option(self) -> Option<&'static str> {
        match self {
            ProtocolVersion::Negotiate => None,
            ProtocolVersion::V2 => Some("2.0"),
            ProtocolVersion::V3 => Some("3.0"),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mount_option().unwrap_or("negotiate"))
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "negotiate" => Ok(ProtocolVersion::Negotiate),
            "2.0" | "2" => Ok(ProtocolVersion::V2),
            "3.0" | "3" => Ok(ProtocolVersion::V3),
            other => Err(format!(
                "unknown protocol version {other:?} (expected negotiate, 2.0 or 3.0)"
            )),
        }
    }
}

/// The persisted storage configuration. Never contains a password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server_address: String,
    #[serde(default)]
    pub share_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub mount_point: PathBuf,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_mount_timeout")]
    pub mount_timeout_seconds: u64,
    #[serde(default)]
    pub auto_mount_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_options: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_mount_timeout() -> u64 {
    DEFAULT_MOUNT_TIMEOUT_SECS
}

impl StorageConfig {
    /// UNC-style source understood by `mount.cifs`: `//host/share`.
    pub fn source(&self) -> String {
        format!("//{}/{}", self.server_address, self.share_name)
    }

    /// Mount call bound; `None` when `mount_timeout_seconds` is 0.
    pub fn mount_timeout(&self) -> Option<std::time::Duration> {
        (self.mount_timeout_seconds > 0)
            .then(|| std::time::Duration::from_secs(self.mount_timeout_seconds))
    }

    /// Check every invariant of the record.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.mount_point.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "mount_point must be an absolute path, got {}",
                self.mount_point.display()
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be in 1..=65535".to_string()));
        }
        if self.enabled {
            for (field, value) in [
                ("server_address", &self.server_address),
                ("share_name", &self.share_name),
                ("username", &self.username),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "{field} must not be empty when storage is enabled"
                    )));
                }
            }
        }
        if self
            .server_address
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(ConfigError::Invalid(format!(
                "server_address contains invalid characters: {:?}",
                self.server_address
            )));
        }
        if self.share_name.contains('/') || self.share_name.contains('\\') {
            return Err(ConfigError::Invalid(format!(
                "share_name must be a single share, got {:?}",
                self.share_name
            )));
        }
        // Both end up as lines of the `mount.cifs` credential file.
        for (field, value) in [
            ("username", Some(&self.username)),
            ("domain", self.domain.as_ref()),
        ] {
            if value.is_some_and(|v| v.contains(['\n', '\r'])) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must not contain line breaks"
                )));
            }
        }
        if let Some(opt) = self.extra_options.iter().find(|o| {
            o.contains(',') || o.starts_with("credentials=") || o.starts_with("password=")
        }) {
            return Err(ConfigError::Invalid(format!(
                "extra_options entry {opt:?} is not allowed"
            )));
        }
        Ok(())
    }

    /// Refuse operations on a disabled configuration.
    pub fn require_enabled(&self) -> Result<(), ConfigError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ConfigError::Invalid(
                "network storage is disabled (set `enabled: true`)".to_string(),
            ))
        }
    }
}

/// Parse and validate configuration text.
pub fn parse(text: &str) -> Result<StorageConfig, ConfigError> {
    let cfg: StorageConfig = serde_yaml::from_str(text)
        .map_err(|e| ConfigError::Invalid(format!("cannot parse configuration: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load the configuration at `path`. Pure read.
pub fn load(path: &Path) -> Result<StorageConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(ConfigError::Invalid(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };
    let cfg = parse(&text)?;
    tracing::debug!(path = %path.display(), server = %cfg.server_address, "configuration loaded");
    Ok(cfg)
}

/// Validate and atomically write `cfg` to `path`, creating the parent directory.
pub fn save(path: &Path, cfg: &StorageConfig) -> Result<(), ConfigError> {
    cfg.validate()?;
    let text = serde_yaml::to_string(cfg)
        .map_err(|e| ConfigError::Invalid(format!("cannot serialize configuration: {e}")))?;
    let write_err =
        |e: std::io::Error| ConfigError::Invalid(format!("cannot write {}: {e}", path.display()));

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(text.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
