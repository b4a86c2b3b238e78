//! CLI entrypoint for the steward server manager.
//!
//! The binary delegates to [`steward_cli::run`], which loads configuration,
//! parses the command and prints its result.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    steward_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
