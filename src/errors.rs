//! Error taxonomy for the mount manager.
//!
//! Messages name the kind first ("PortClosed: ...") so a caller can show the
//! string verbatim. They MUST NOT contain passwords.

use std::path::PathBuf;

use crate::exit_codes;
use crate::retry::{RetryError, Retryable};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MissingFile: no storage configuration at {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("Invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("cannot write credential file in {}: {source}", dir.display())]
    Store {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Unreachable: host {host} did not respond ({detail})")]
    Unreachable { host: String, detail: String },

    #[error("PortClosed: port {port} closed on host {host} ({detail})")]
    PortClosed {
        host: String,
        port: u16,
        detail: String,
    },

    #[error("MountFailed: {detail}")]
    MountFailed { detail: String, transient: bool },

    #[error("AlreadyMounted: {} is occupied by {found}", mount_point.display())]
    AlreadyMounted { mount_point: PathBuf, found: String },

    #[error("PermissionDenied: {detail}")]
    PermissionDenied { detail: String },

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl Retryable for MountError {
    fn is_retryable(&self) -> bool {
        match self {
            MountError::Unreachable { .. } | MountError::PortClosed { .. } => true,
            MountError::MountFailed { transient, .. } => *transient,
            MountError::AlreadyMounted { .. }
            | MountError::PermissionDenied { .. }
            | MountError::Credential(_) => false,
        }
    }
}

impl MountError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MountError::Unreachable { .. } => exit_codes::UNREACHABLE,
            MountError::PortClosed { .. } => exit_codes::PORT_CLOSED,
            MountError::MountFailed { .. } => exit_codes::MOUNT_FAILED,
            MountError::AlreadyMounted { .. } => exit_codes::ALREADY_MOUNTED,
            MountError::PermissionDenied { .. } => exit_codes::PERMISSION_DENIED,
            MountError::Credential(e) => credential_exit_code(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UnmountError {
    #[error("NotMounted: {} is not mounted", mount_point.display())]
    NotMounted { mount_point: PathBuf },

    #[error("Busy: {} could not be unmounted: {detail}", mount_point.display())]
    Busy { mount_point: PathBuf, detail: String },

    #[error("UnmountFailed: {detail}")]
    Failed { detail: String },
}

impl UnmountError {
    pub fn exit_code(&self) -> i32 {
        match self {
            UnmountError::NotMounted { .. } => exit_codes::NOT_MOUNTED,
            UnmountError::Busy { .. } => exit_codes::UNMOUNT_BUSY,
            UnmountError::Failed { .. } => exit_codes::RUNTIME_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Busy: another operation (pid {pid}) holds the lock for {}", mount_point.display())]
    Busy { mount_point: PathBuf, pid: u32 },

    #[error("cannot manage lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Every failure an operation can surface to its caller.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Mount(#[from] RetryError<MountError>),

    #[error(transparent)]
    Unmount(#[from] UnmountError),

    #[error("{0}")]
    Runtime(String),
}

impl From<MountError> for OpError {
    fn from(e: MountError) -> Self {
        OpError::Mount(RetryError::Failed {
            attempts: 1,
            last: e,
        })
    }
}

impl OpError {
    /// Distinct non-zero status per error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            OpError::Config(ConfigError::MissingFile { .. }) => exit_codes::CONFIG_MISSING,
            OpError::Config(ConfigError::Invalid(_)) => exit_codes::CONFIG_INVALID,
            OpError::Credential(e) => credential_exit_code(e),
            OpError::Guard(GuardError::Busy { .. }) => exit_codes::GUARD_BUSY,
            OpError::Guard(GuardError::Io { .. }) => exit_codes::RUNTIME_ERROR,
            OpError::Mount(RetryError::Failed { last, .. }) => last.exit_code(),
            OpError::Mount(RetryError::Cancelled { .. }) => exit_codes::CANCELLED,
            OpError::Unmount(e) => e.exit_code(),
            OpError::Runtime(_) => exit_codes::RUNTIME_ERROR,
        }
    }
}

fn credential_exit_code(e: &CredentialError) -> i32 {
    match e {
        CredentialError::Unavailable(_) => exit_codes::CREDENTIAL_UNAVAILABLE,
        CredentialError::Store { .. } => exit_codes::RUNTIME_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(
            MountError::Unreachable {
                host: "h".into(),
                detail: "no response".into()
            }
            .is_retryable()
        );
        assert!(
            MountError::PortClosed {
                host: "h".into(),
                port: 445,
                detail: "connection refused".into()
            }
            .is_retryable()
        );
        assert!(
            MountError::MountFailed {
                detail: "Host is down".into(),
                transient: true
            }
            .is_retryable()
        );
    }

    #[test]
    fn non_retryable_kinds() {
        assert!(
            !MountError::PermissionDenied {
                detail: "x".into()
            }
            .is_retryable()
        );
        assert!(
            !MountError::AlreadyMounted {
                mount_point: "/mnt/nas".into(),
                found: "//other/share".into()
            }
            .is_retryable()
        );
        assert!(
            !MountError::MountFailed {
                detail: "bad option".into(),
                transient: false
            }
            .is_retryable()
        );
        assert!(!MountError::Credential(CredentialError::Unavailable("x".into())).is_retryable());
    }

    #[test]
    fn messages_lead_with_kind() {
        let e = MountError::PortClosed {
            host: "10.0.0.5".into(),
            port: 445,
            detail: "connection refused".into(),
        };
        assert_eq!(
            e.to_string(),
            "PortClosed: port 445 closed on host 10.0.0.5 (connection refused)"
        );
        let e = UnmountError::NotMounted {
            mount_point: "/mnt/nas".into(),
        };
        assert_eq!(e.to_string(), "NotMounted: /mnt/nas is not mounted");
    }

    #[test]
    fn exhausted_retry_message_carries_attempt_count() {
        let e = OpError::from(RetryError::Failed {
            attempts: 3,
            last: MountError::PortClosed {
                host: "10.0.0.5".into(),
                port: 445,
                detail: "connection refused".into(),
            },
        });
        assert_eq!(
            e.to_string(),
            "PortClosed: port 445 closed on host 10.0.0.5 (connection refused) after 3 attempts"
        );
        assert_eq!(e.exit_code(), exit_codes::PORT_CLOSED);
    }

    #[test]
    fn op_error_exit_codes() {
        assert_eq!(
            OpError::from(ConfigError::MissingFile {
                path: "/x".into()
            })
            .exit_code(),
            exit_codes::CONFIG_MISSING
        );
        assert_eq!(
            OpError::from(ConfigError::Invalid("x".into())).exit_code(),
            exit_codes::CONFIG_INVALID
        );
        assert_eq!(
            OpError::from(CredentialError::Unavailable("x".into())).exit_code(),
            exit_codes::CREDENTIAL_UNAVAILABLE
        );
        assert_eq!(
            OpError::from(GuardError::Busy {
                mount_point: "/mnt/nas".into(),
                pid: 1
            })
            .exit_code(),
            exit_codes::GUARD_BUSY
        );
        assert_eq!(
            OpError::from(UnmountError::NotMounted {
                mount_point: "/mnt/nas".into()
            })
            .exit_code(),
            exit_codes::NOT_MOUNTED
        );
        assert_eq!(
            OpError::from(RetryError::<MountError>::Cancelled {
                attempts: 1,
                last: None
            })
            .exit_code(),
            exit_codes::CANCELLED
        );
        assert_eq!(
            OpError::from(MountError::Credential(CredentialError::Unavailable(
                "x".into()
            )))
            .exit_code(),
            exit_codes::CREDENTIAL_UNAVAILABLE
        );
    }
}
