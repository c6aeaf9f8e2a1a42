use clap::CommandFactory;
use clap_complete::Shell;
use std::io;

/// Write the completion script for `shell` to stdout and return exit code 0.
pub fn run_completions(shell: Shell) -> i32 {
    let mut cmd = crate::cli::Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
    crate::exit_codes::SUCCESS
}
