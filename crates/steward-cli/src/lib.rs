//! Command-line runtime for the steward toolkit.
//!
//! The module owns argument parsing, configuration bootstrapping and the
//! mapping of operation outcomes onto the process streams. It can be driven
//! from the binary entrypoint or from tests with substituted configuration
//! loading and IO streams.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use steward_core::lifecycle::ServerManager;
use tracing::debug;

mod cli;
mod config;
mod dispatch;
mod errors;
mod output;
mod telemetry;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;
use output::OutputOptions;

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Runs the CLI using the provided arguments and IO handles.
///
/// Returns success when the operation succeeded and failure otherwise,
/// including usage and configuration errors.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, stdout: &mut W, stderr: &mut E, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let arguments: Vec<OsString> = args.into_iter().collect();
    match execute(&arguments, stdout, stderr, loader) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W, E, L>(
    arguments: &[OsString],
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> Result<bool, AppError>
where
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let split = split_config_arguments(arguments);
    let cli = Cli::try_parse_from(&split.command_arguments).map_err(AppError::CliUsage)?;
    let config = loader.load(&split.config_arguments)?;
    telemetry::initialise(&config)?;

    let manager = ServerManager::system(config);
    manager.layout().prepare()?;
    let options = OutputOptions {
        pretty: cli.pretty,
        envelope: cli.envelope,
    };
    debug!(target: CLI_TARGET, command = cli.command.as_ref(), "dispatching");
    dispatch::dispatch(&manager, cli.command, options, stdout, stderr)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use steward_config::Config;
    use tempfile::TempDir;

    use super::*;

    struct RootedLoader<'a>(&'a Path);

    impl ConfigLoader for RootedLoader<'_> {
        fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
            Ok(Config::rooted_at(self.0))
        }
    }

    fn invoke(root: &TempDir, args: &[&str]) -> (ExitCode, String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit = run_with_loader(
            args.iter().map(OsString::from),
            &mut stdout,
            &mut stderr,
            &RootedLoader(root.path()),
        );
        (
            exit,
            String::from_utf8(stdout).expect("utf8"),
            String::from_utf8(stderr).expect("utf8"),
        )
    }

    #[test]
    fn empty_installation_has_no_backups() {
        let root = tempfile::tempdir().expect("tempdir");
        let (exit, stdout, stderr) = invoke(&root, &["steward", "backup-list"]);
        assert_eq!(exit, ExitCode::SUCCESS, "stderr: {stderr}");
        assert_eq!(stdout, "[]\n");
        assert!(root.path().join("backups").join("incremental").is_dir());
    }

    #[test]
    fn missing_instance_fails_with_the_code_chain() {
        let root = tempfile::tempdir().expect("tempdir");
        let (exit, stdout, stderr) = invoke(&root, &["steward", "state", "ghost"]);
        assert_eq!(exit, ExitCode::FAILURE);
        assert!(stdout.is_empty());
        assert!(stderr.contains("code: 1272"), "stderr: {stderr}");
    }

    #[test]
    fn envelope_reports_the_function_name() {
        let root = tempfile::tempdir().expect("tempdir");
        let (exit, stdout, _) = invoke(&root, &["steward", "--envelope", "backup-list"]);
        assert_eq!(exit, ExitCode::SUCCESS);
        let wrapped: serde_json::Value = serde_json::from_str(&stdout).expect("json");
        assert_eq!(
            wrapped,
            serde_json::json!({"function": "backup-list", "result": []})
        );
    }

    #[test]
    fn help_goes_to_stdout() {
        let root = tempfile::tempdir().expect("tempdir");
        let (exit, stdout, _) = invoke(&root, &["steward", "--help"]);
        assert_eq!(exit, ExitCode::SUCCESS);
        assert!(stdout.contains("backup-create"));
    }

    #[test]
    fn unknown_commands_are_usage_errors() {
        let root = tempfile::tempdir().expect("tempdir");
        let (exit, _, stderr) = invoke(&root, &["steward", "frobnicate"]);
        assert_eq!(exit, ExitCode::FAILURE);
        assert!(stderr.contains("frobnicate"));
    }
}
