/// Exit code: success.
pub const SUCCESS: i32 = 0;

/// Exit code: runtime error not covered by a more specific kind (I/O, unexpected tool output).
pub const RUNTIME_ERROR: i32 = 1;

/// Exit code: usage / input error (clap parse failure, bad CIDR, etc.).
pub const USAGE_ERROR: i32 = 2;

/// Exit code: no configuration file at the resolved path.
pub const CONFIG_MISSING: i32 = 10;

/// Exit code: configuration exists but fails to parse or validate.
pub const CONFIG_INVALID: i32 = 11;

/// Exit code: no password could be obtained (no argument, no `SMB_PASSWORD`, unattended).
pub const CREDENTIAL_UNAVAILABLE: i32 = 20;

/// Exit code: the storage host did not answer the reachability probe.
pub const UNREACHABLE: i32 = 30;

/// Exit code: the host answered but the SMB port is closed.
pub const PORT_CLOSED: i32 = 31;

/// Exit code: the OS mount call failed or post-mount verification failed.
pub const MOUNT_FAILED: i32 = 32;

/// Exit code: the mount point is occupied by a different source.
pub const ALREADY_MOUNTED: i32 = 33;

/// Exit code: the server or the OS rejected our credentials or privileges.
pub const PERMISSION_DENIED: i32 = 34;

/// Exit code: `unmount` on a point that is not mounted.
pub const NOT_MOUNTED: i32 = 40;

/// Exit code: every unmount strategy failed (usually open files on the share).
pub const UNMOUNT_BUSY: i32 = 41;

/// Exit code: another live process holds the operation lock for this mount point.
pub const GUARD_BUSY: i32 = 50;

/// Exit code: prerequisite command not found (`mount.cifs`, `systemctl`, etc.).
pub const PREREQ_NOT_FOUND: i32 = 127;

/// Exit code: operation cancelled by SIGINT/SIGTERM/SIGHUP.
pub const CANCELLED: i32 = 130;
