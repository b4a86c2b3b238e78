//! CLI argument definitions for the steward binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use steward_core::players::Permission;
use steward_core::versions::Branch;
use strum::AsRefStr;

/// Command-line interface for managing dedicated game-server instances.
#[derive(Parser, Debug)]
#[command(name = "steward", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Pretty-prints JSON output.
    #[arg(long, global = true)]
    pub(crate) pretty: bool,
    /// Wraps output in a `{function, result}` envelope.
    #[arg(long, global = true)]
    pub(crate) envelope: bool,
    /// The operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Instance property overrides given as `key=value`.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct PropertyArgs {
    /// Sets a server property, for example `--set server-port=19132`.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub(crate) properties: Vec<(String, String)>,
}

/// Operations exposed by the binary.
///
/// The kebab-case variant name doubles as the envelope's function name.
#[derive(Subcommand, Debug, Clone, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub(crate) enum Command {
    /// Installs a new instance from a cached archive.
    Create {
        /// Instance name.
        name: String,
        /// Archive version; defaults to the newest cached one.
        #[arg(long)]
        version: Option<String>,
        /// Release branch of the archive.
        #[arg(long)]
        branch: Option<Branch>,
        /// Rewrites metadata of an existing instance.
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        defaults: PropertyArgs,
    },
    /// Deletes an instance that is not running.
    Remove {
        /// Instance name.
        name: String,
    },
    /// Starts an instance with per-start overrides.
    Start {
        /// Instance name.
        name: String,
        #[command(flatten)]
        overrides: PropertyArgs,
    },
    /// Starts an instance from its persisted configuration.
    StartSimple {
        /// Instance name.
        name: String,
    },
    /// Starts every instance.
    StartAll,
    /// Stops an instance.
    Stop {
        /// Instance name.
        name: String,
        /// Waits for connected players to leave first.
        #[arg(long)]
        wait: bool,
    },
    /// Stops every instance.
    StopAll {
        /// Waits for connected players to leave first.
        #[arg(long)]
        wait: bool,
    },
    /// Reinstalls an instance at another version.
    Update {
        /// Instance name.
        name: String,
        /// Target version; defaults to the newest online one.
        #[arg(long)]
        version: Option<String>,
        /// Reinstalls even when the version does not change.
        #[arg(long)]
        force: bool,
    },
    /// Updates every stopped instance.
    UpdateAll {
        /// Reinstalls even when the version does not change.
        #[arg(long)]
        force: bool,
    },
    /// Lists created instances and running sessions.
    List,
    /// Shows metadata and log state of an instance.
    Details {
        /// Instance name.
        name: String,
    },
    /// Shows the lifecycle state of an instance.
    State {
        /// Instance name.
        name: String,
    },
    /// Broadcasts a chat message.
    Say {
        /// Instance name.
        name: String,
        /// Message text.
        message: String,
    },
    /// Types a console command into the session.
    SendCommand {
        /// Instance name.
        name: String,
        /// Console command.
        command: String,
    },
    /// Lists the worlds of an instance.
    GetWorlds {
        /// Instance name.
        name: String,
    },
    /// Deletes a world that is not in use.
    RemoveWorld {
        /// Instance name.
        name: String,
        /// World directory name.
        level: String,
    },
    /// Records an incremental backup of a world.
    BackupCreate {
        /// Instance name.
        name: String,
        /// World to back up; needed when the instance has several.
        #[arg(long)]
        level: Option<String>,
        /// Backup name; defaults to a timestamped one.
        #[arg(long)]
        backup_name: Option<String>,
        /// Free-form note stored with the backup.
        #[arg(long)]
        description: Option<String>,
        /// Replaces a backup of the same name.
        #[arg(long)]
        overwrite: bool,
        /// Gzip-compresses newly stored content.
        #[arg(long)]
        compress: bool,
    },
    /// Lists backups.
    BackupList,
    /// Restores a backup into an instance.
    BackupRestore {
        /// Backup name.
        backup: String,
        /// Target instance; defaults to the recorded one.
        #[arg(long)]
        server: Option<String>,
        /// Target world; defaults to the recorded one.
        #[arg(long)]
        level: Option<String>,
    },
    /// Deletes a backup and its unreferenced content.
    BackupRemove {
        /// Backup name.
        backup: String,
    },
    /// Backs up every stopped instance.
    BackupAll {
        /// Gzip-compresses newly stored content.
        #[arg(long)]
        compress: bool,
    },
    /// Caches a distribution archive.
    Download {
        /// Release branch.
        #[arg(long, default_value_t = Branch::Stable)]
        branch: Branch,
        /// Version; defaults to the newest online one.
        #[arg(long)]
        version: Option<String>,
    },
    /// Shows the newest online version of a branch.
    OnlineVersion {
        /// Release branch.
        #[arg(long, default_value_t = Branch::Stable)]
        branch: Branch,
    },
    /// Lists cached archive versions per branch.
    Downloaded,
    /// Grants or revokes a player's permission.
    Permission {
        /// Instance name.
        name: String,
        /// Gamertag.
        player: String,
        /// New permission; omitted to revoke.
        #[arg(long)]
        permission: Option<Permission>,
    },
    /// Starts the job scheduler daemon.
    SchedulerStart,
    /// Stops the job scheduler daemon.
    SchedulerStop,
    /// Restarts the job scheduler so it rereads its job file.
    SchedulerRestart,
    /// Prints the job file.
    SchedulerGet {
        /// Converts the YAML document to JSON.
        #[arg(long)]
        json: bool,
    },
    /// Replaces the job file with a YAML or JSON document.
    SchedulerSet {
        /// File holding the new job document.
        file: PathBuf,
    },
    /// Lists scheduled jobs.
    SchedulerList,
    /// Pauses a scheduled job.
    SchedulerPause {
        /// Job name.
        job: String,
    },
    /// Resumes a paused job.
    SchedulerResume {
        /// Job name.
        job: String,
    },
    /// Runs a job once, now.
    SchedulerRun {
        /// Job name.
        job: String,
    },
}

fn parse_property(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, property)| (key.trim().to_owned(), property.trim().to_owned()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got `{value}`"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("server-port=19132", ("server-port", "19132"))]
    #[case::padded(" level-name = My World ", ("level-name", "My World"))]
    #[case::empty_value("motd=", ("motd", ""))]
    fn properties_split_on_the_first_equals(#[case] raw: &str, #[case] expected: (&str, &str)) {
        let (key, value) = parse_property(raw).expect("valid property");
        assert_eq!((key.as_str(), value.as_str()), expected);
    }

    #[rstest]
    #[case::no_equals("server-port")]
    #[case::no_key("=19132")]
    fn malformed_properties_are_rejected(#[case] raw: &str) {
        assert!(parse_property(raw).is_err());
    }

    #[test]
    fn command_names_are_kebab_case() {
        let cli = Cli::try_parse_from(["steward", "send-command", "s1", "list"]).expect("parse");
        assert_eq!(cli.command.as_ref(), "send-command");
    }

    #[test]
    fn create_collects_repeated_overrides() {
        let cli = Cli::try_parse_from([
            "steward",
            "create",
            "s1",
            "--branch",
            "preview",
            "--set",
            "server-port=19140",
            "--set",
            "level-name=L1",
        ])
        .expect("parse");
        let Command::Create {
            branch, defaults, ..
        } = cli.command
        else {
            panic!("expected create");
        };
        assert_eq!(branch, Some(Branch::Preview));
        assert_eq!(defaults.properties.len(), 2);
    }

    #[test]
    fn scheduler_commands_take_their_arguments() {
        let cli = Cli::try_parse_from(["steward", "scheduler-set", "/tmp/jobs.yaml"])
            .expect("parse");
        assert_eq!(cli.command.as_ref(), "scheduler-set");
        let Command::SchedulerSet { file } = cli.command else {
            panic!("expected scheduler-set");
        };
        assert_eq!(file, PathBuf::from("/tmp/jobs.yaml"));

        let paused = Cli::try_parse_from(["steward", "scheduler-pause", "Nightly"]).expect("parse");
        assert!(matches!(paused.command, Command::SchedulerPause { ref job } if job == "Nightly"));
    }

    #[test]
    fn output_flags_are_global() {
        let cli = Cli::try_parse_from(["steward", "list", "--pretty", "--envelope"])
            .expect("parse");
        assert!(cli.pretty);
        assert!(cli.envelope);
    }
}
