//! Maps parsed commands onto `steward-core` operations.

use std::io::Write;

use steward_core::backup::BackupRequest;
use steward_core::lifecycle::ServerManager;
use steward_core::players::JsonPlayerRegistry;
use steward_core::properties::Properties;
use steward_core::versions::{self, Version};

use crate::cli::{Command, PropertyArgs};
use crate::errors::AppError;
use crate::output::{OutputOptions, emit};

const SERVER_NAME: &str = "server-name";
const VERSION: &str = "version";
const BRANCH: &str = "branch";

fn named(name: String, extra: PropertyArgs) -> Properties {
    let mut properties: Properties = extra.properties.into_iter().collect();
    properties.insert(SERVER_NAME, name);
    properties
}

/// Runs `command` and writes its outcome; returns whether it succeeded.
pub(crate) fn dispatch<W: Write, R: Write>(
    manager: &ServerManager,
    command: Command,
    options: OutputOptions,
    stdout: &mut W,
    stderr: &mut R,
) -> Result<bool, AppError> {
    let function_name = command.as_ref().to_owned();
    let function = function_name.as_str();
    match command {
        Command::Create {
            name,
            version,
            branch,
            force,
            defaults,
        } => {
            let mut properties = named(name, defaults);
            if let Some(pinned) = version {
                properties.insert(VERSION, pinned);
            }
            if let Some(selected) = branch {
                properties.insert(BRANCH, selected.to_string());
            }
            let outcome = manager.create(&properties, force);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::Remove { name } => emit(options, function, manager.remove(&name), stdout, stderr),
        Command::Start { name, overrides } => {
            let outcome = manager.start(&named(name, overrides));
            emit(options, function, outcome, stdout, stderr)
        }
        Command::StartSimple { name } => {
            emit(options, function, manager.start_simple(&name), stdout, stderr)
        }
        Command::StartAll => emit(options, function, manager.start_all(), stdout, stderr),
        Command::Stop { name, wait } => {
            emit(options, function, manager.stop(&name, wait), stdout, stderr)
        }
        Command::StopAll { wait } => emit(options, function, manager.stop_all(wait), stdout, stderr),
        Command::Update {
            name,
            version,
            force,
        } => {
            let outcome = manager.update(&name, version.as_deref(), force);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::UpdateAll { force } => {
            emit(options, function, manager.update_all(force), stdout, stderr)
        }
        Command::List => emit(options, function, manager.list(), stdout, stderr),
        Command::Details { name } => emit(options, function, manager.details(&name), stdout, stderr),
        Command::State { name } => {
            emit(options, function, manager.instance_state(&name), stdout, stderr)
        }
        Command::Say { name, message } => {
            emit(options, function, manager.say(&name, &message), stdout, stderr)
        }
        Command::SendCommand { name, command } => {
            let outcome = manager.send_command(&name, &command);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::GetWorlds { name } => emit(options, function, manager.worlds(&name), stdout, stderr),
        Command::RemoveWorld { name, level } => {
            let outcome = manager.remove_world(&name, &level);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::BackupCreate {
            name,
            level,
            backup_name,
            description,
            overwrite,
            compress,
        } => {
            let request = BackupRequest {
                level_name: level,
                backup_name,
                description,
                overwrite,
                compress,
                ..BackupRequest::new(name)
            };
            let outcome = manager.backups().create(&request);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::BackupList => emit(options, function, manager.backups().list(), stdout, stderr),
        Command::BackupRestore {
            backup,
            server,
            level,
        } => {
            let outcome = manager
                .backups()
                .restore(&backup, server.as_deref(), level.as_deref());
            emit(options, function, outcome, stdout, stderr)
        }
        Command::BackupRemove { backup } => {
            let outcome = manager.backups().remove(&backup);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::BackupAll { compress } => {
            emit(options, function, manager.backup_all(compress), stdout, stderr)
        }
        Command::Download { branch, version } => {
            let outcome = version
                .as_deref()
                .map(str::parse::<Version>)
                .transpose()
                .and_then(|pinned| {
                    versions::download(manager.layout(), manager.catalog(), branch, pinned)
                });
            emit(options, function, outcome, stdout, stderr)
        }
        Command::OnlineVersion { branch } => {
            let outcome = versions::online_version(manager.catalog(), branch);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::Downloaded => {
            let outcome = versions::downloaded_versions(manager.layout());
            emit(options, function, outcome, stdout, stderr)
        }
        Command::Permission {
            name,
            player,
            permission,
        } => {
            let registry = JsonPlayerRegistry::in_dir(&manager.config().servers_dir);
            let outcome =
                registry.update_permission(manager.files(&name).root(), &player, permission);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::SchedulerStart => {
            emit(options, function, manager.scheduler().start(), stdout, stderr)
        }
        Command::SchedulerStop => emit(options, function, manager.scheduler().stop(), stdout, stderr),
        Command::SchedulerRestart => {
            emit(options, function, manager.scheduler().restart(), stdout, stderr)
        }
        Command::SchedulerGet { json } => {
            let outcome = manager.scheduler().get_config(json);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::SchedulerSet { file } => {
            let outcome = manager.scheduler().set_config_from(&file);
            emit(options, function, outcome, stdout, stderr)
        }
        Command::SchedulerList => {
            emit(options, function, manager.scheduler().list_jobs(), stdout, stderr)
        }
        Command::SchedulerPause { job } => {
            emit(options, function, manager.scheduler().pause(&job), stdout, stderr)
        }
        Command::SchedulerResume { job } => {
            emit(options, function, manager.scheduler().resume(&job), stdout, stderr)
        }
        Command::SchedulerRun { job } => {
            emit(options, function, manager.scheduler().run(&job), stdout, stderr)
        }
    }
}
