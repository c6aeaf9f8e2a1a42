mod boot;
mod cli;
mod cmd;
mod completions;
mod config;
mod configure;
mod connectivity;
mod controller;
mod credentials;
mod doctor;
mod errors;
mod exit_codes;
mod format;
mod guard;
mod lifecycle;
mod mount_table;
mod naming;
mod platform;
mod probe;
mod progress;
mod retry;
mod signals;
mod status;
#[cfg(test)]
mod testing;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr; `RUST_LOG` overrides the `-v` level.
fn setup_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = cli::Cli::parse();
    setup_tracing(cli.verbose);
    let config = cli.config.as_path();

    let code = match cli.command {
        cli::Commands::Mount { password_stdin } => lifecycle::run_mount(config, password_stdin),
        cli::Commands::Unmount => lifecycle::run_unmount(config),
        cli::Commands::Remount {
            password_stdin,
            attempts,
            delay,
        } => lifecycle::run_remount(config, password_stdin, attempts, delay),
        cli::Commands::AutoMount {
            force,
            attempts,
            delay,
        } => lifecycle::run_auto_mount(config, force, attempts, delay),
        cli::Commands::Status { json } => status::run_status(config, json),
        cli::Commands::Shares { json } => status::run_shares(json),
        cli::Commands::TestConnectivity {
            list_shares,
            password_stdin,
        } => connectivity::run_test_connectivity(config, list_shares, password_stdin),
        cli::Commands::Scan { cidr } => connectivity::run_scan(&cidr),
        cli::Commands::Configure {
            server,
            share,
            username,
            mount_point,
            domain,
            protocol,
            port,
            timeout,
            options,
            auto_mount,
            no_auto_mount,
            disable,
        } => configure::run_configure(
            config,
            configure::ConfigChanges {
                server,
                share,
                username,
                mount_point,
                domain,
                protocol,
                port,
                timeout,
                options,
                auto_mount: match (auto_mount, no_auto_mount) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                disable,
            },
        ),
        cli::Commands::SetupBootMount => boot::run_setup_boot_mount(config),
        cli::Commands::RemoveBootMount => boot::run_remove_boot_mount(),
        cli::Commands::Doctor => doctor::run_doctor(config),
        cli::Commands::Completions { shell } => completions::run_completions(shell),
    };
    std::process::exit(code);
}
