use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ProtocolVersion;
use crate::probe::DEFAULT_SCAN_RANGE;

#[derive(Parser)]
#[command(
    name = "nasmount",
    version,
    about = "Mount lifecycle manager for the SMB/CIFS share backing a media library",
    long_about = "nasmount mounts, verifies and unmounts one SMB/CIFS network share.\n\n\
                  Mutating commands (mount, unmount, remount, auto-mount) are serialized per\n\
                  mount point. The password is never stored: pipe it with --password-stdin,\n\
                  set SMB_PASSWORD, or type it at the prompt."
)]
pub struct Cli {
    /// Storage configuration file
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        env = "NASMOUNT_CONFIG",
        default_value = crate::config::DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mount the configured share (single attempt)
    Mount {
        /// Read the password from the first line of standard input
        #[arg(long)]
        password_stdin: bool,
    },

    /// Unmount the configured share (graceful, then forced, then lazy)
    Unmount,

    /// Unmount, then mount again with retries
    Remount {
        /// Read the password from the first line of standard input
        #[arg(long)]
        password_stdin: bool,

        /// Maximum mount attempts
        #[arg(long, value_name = "N", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
        attempts: u32,

        /// Seconds to wait between attempts
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        delay: u64,
    },

    /// Mount with retries if auto-mount is enabled (used at boot)
    AutoMount {
        /// Mount even when auto_mount_enabled is false
        #[arg(long)]
        force: bool,

        /// Maximum mount attempts
        #[arg(long, value_name = "N", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
        attempts: u32,

        /// Seconds to wait between attempts
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        delay: u64,
    },

    /// Show the state of the configured mount point
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every mounted SMB/CIFS share
    Shares {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the storage host and SMB port answer
    TestConnectivity {
        /// Also list the shares the server advertises (needs smbclient)
        #[arg(long)]
        list_shares: bool,

        /// Read the password for --list-shares from standard input
        #[arg(long, requires = "list_shares")]
        password_stdin: bool,
    },

    /// Sweep an IPv4 range for hosts with the SMB port open
    Scan {
        /// Network in CIDR notation (prefix 22 to 32)
        #[arg(value_name = "CIDR", default_value = DEFAULT_SCAN_RANGE)]
        cidr: String,
    },

    /// Write or update the storage configuration
    Configure {
        /// Storage host name or IP address
        #[arg(long, value_name = "HOST")]
        server: Option<String>,

        /// Share name on the host
        #[arg(long, value_name = "NAME")]
        share: Option<String>,

        /// Account used to authenticate
        #[arg(long, value_name = "USER")]
        username: Option<String>,

        /// Absolute local mount point
        #[arg(long, value_name = "PATH")]
        mount_point: Option<PathBuf>,

        /// Authentication domain or workgroup
        #[arg(long, value_name = "DOMAIN")]
        domain: Option<String>,

        /// SMB dialect: negotiate, 2.0 or 3.0
        #[arg(long, value_name = "VERSION")]
        protocol: Option<ProtocolVersion>,

        /// SMB port
        #[arg(long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,

        /// Bound on the mount call in seconds (0 disables it)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Extra mount option (repeatable, replaces existing ones)
        #[arg(long = "option", value_name = "OPT")]
        options: Vec<String>,

        /// Mount automatically at boot
        #[arg(long, conflicts_with = "no_auto_mount")]
        auto_mount: bool,

        /// Do not mount automatically at boot
        #[arg(long)]
        no_auto_mount: bool,

        /// Keep the configuration but disable network storage
        #[arg(long)]
        disable: bool,
    },

    /// Install a systemd unit that runs auto-mount at boot
    SetupBootMount,

    /// Remove the boot-time systemd unit
    RemoveBootMount,

    /// Validate prerequisites (mount.cifs, umount, smbclient, privileges, configuration)
    Doctor,

    #[command(
        about = "Generate shell completion script (bash, zsh, fish, powershell, elvish)",
        long_about = "Generates a completion script for your shell to enable tab-completion of nasmount commands.\n\n\
                      EXAMPLES:\n\
                      \n\
                      # Generate bash completions and install system-wide\n\
                      nasmount completions bash | sudo tee /etc/bash_completion.d/nasmount\n\
                      \n\
                      # Generate zsh completions and install system-wide\n\
                      nasmount completions zsh | sudo tee /usr/share/zsh/site-functions/_nasmount\n\
                      \n\
                      # Generate fish completions and install in user directory\n\
                      nasmount completions fish | tee ~/.config/fish/completions/nasmount.fish"
    )]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
