#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::action::{CliAction, OutputFormat};
use super::args::{command_spec, ensure_no_unknown_flags};
use super::commands::CliCommand;
use edq::JobPatch;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CliError {
    #[error("Missing required argument: {}", arg)]
    MissingRequiredArg { arg: String },
    #[error("Unknown command: {}", cmd)]
    UnknownCommand { cmd: String },
    #[error("Unknown flag: {}", flag)]
    UnknownFlag { flag: String },
    #[error("Invalid argument value for {}: {}", arg, error)]
    InvalidArgValue { arg: String, error: String },
}

/// Parses arguments without the program name.
///
/// # Errors
/// Returns a `CliError` for unknown commands or flags and for missing or
/// malformed values.
pub fn parse_cli_args(raw_args: &[String]) -> Result<CliAction, CliError> {
    let output = if raw_args.iter().any(|arg| arg == "--json") {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let args: Vec<String> = raw_args
        .iter()
        .filter(|arg| arg.as_str() != "--json")
        .cloned()
        .collect();

    if args
        .get(1)
        .is_some_and(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        return Ok(CliAction::ShowHelp);
    }

    let Some(name) = args.first().map(String::as_str) else {
        return if output == OutputFormat::Json {
            Err(CliError::MissingRequiredArg {
                arg: "command".to_string(),
            })
        } else {
            Ok(CliAction::ShowHelp)
        };
    };

    match name {
        "-h" | "--help" | "help" => return Ok(CliAction::ShowHelp),
        "-V" | "--version" | "version" => return Ok(CliAction::ShowVersion),
        _ => {}
    }

    let spec = command_spec(name).ok_or_else(|| CliError::UnknownCommand {
        cmd: name.to_string(),
    })?;
    ensure_no_unknown_flags(&args, spec.flags)?;

    parse_command(name, &args).map(|command| CliAction::Command { command, output })
}

fn parse_command(name: &str, args: &[String]) -> Result<CliCommand, CliError> {
    match name {
        "init-db" => Ok(CliCommand::InitDb),
        "enqueue" => Ok(CliCommand::Enqueue {
            project_path: parse_required_arg(args, "project_path")?,
            transcript_file: parse_required_arg(args, "transcript_file")?,
            priority: parse_optional_arg(args, "priority")?,
            max_retries: parse_optional_arg(args, "max_retries")?,
        }),
        "get" => Ok(CliCommand::Get {
            id: parse_required_arg(args, "id")?,
        }),
        "list" => Ok(CliCommand::List {
            status: parse_optional_arg(args, "status")?,
            page: parse_optional_arg(args, "page")?,
            page_size: parse_optional_arg(args, "page_size")?,
        }),
        "stats" => Ok(CliCommand::Stats),
        "claim-next" => Ok(CliCommand::ClaimNext),
        "heartbeat" => Ok(CliCommand::Heartbeat {
            id: parse_required_arg(args, "id")?,
        }),
        "update" => {
            let id = parse_required_arg(args, "id")?;
            let patch = JobPatch {
                status: parse_optional_arg(args, "status")?,
                priority: parse_optional_arg(args, "priority")?,
                current_phase: parse_optional_arg(args, "phase")?,
                error_message: parse_optional_arg(args, "error")?,
                actual_cost: parse_optional_arg(args, "actual_cost")?,
                manifest_path: parse_optional_arg(args, "manifest_path")?,
                logs_path: parse_optional_arg(args, "logs_path")?,
                ..JobPatch::default()
            };
            if patch.is_empty() {
                return Err(CliError::MissingRequiredArg {
                    arg: "at least one field to update".to_string(),
                });
            }
            Ok(CliCommand::Update { id, patch })
        }
        "delete" => Ok(CliCommand::Delete {
            id: parse_required_arg(args, "id")?,
        }),
        "events" => Ok(CliCommand::Events {
            id: parse_optional_arg(args, "id")?,
            event_type: parse_optional_arg(args, "type")?,
            limit: parse_optional_arg(args, "limit")?,
        }),
        "config-get" => Ok(CliCommand::ConfigGet {
            key: parse_required_arg(args, "key")?,
        }),
        "config-set" => Ok(CliCommand::ConfigSet {
            key: parse_required_arg(args, "key")?,
            value: parse_required_arg(args, "value")?,
            value_type: parse_optional_arg(args, "type")?,
            description: parse_optional_arg(args, "description")?,
        }),
        "config-list" => Ok(CliCommand::ConfigList),
        "reap" => Ok(CliCommand::Reap {
            threshold_minutes: parse_optional_arg(args, "threshold_minutes")?,
        }),
        "reaper" => Ok(CliCommand::Reaper {
            interval_secs: parse_optional_arg(args, "interval_secs")?,
        }),
        other => Err(CliError::UnknownCommand {
            cmd: other.to_string(),
        }),
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Result<Option<&'a String>, CliError> {
    let flag = format!("--{}", name.replace('_', "-"));
    let Some(position) = args.iter().position(|a| a.as_str() == flag) else {
        return Ok(None);
    };

    match args.get(position + 1) {
        Some(value) if !value.starts_with("--") => Ok(Some(value)),
        _ => Err(CliError::MissingRequiredArg {
            arg: name.to_string(),
        }),
    }
}

fn parse_required_arg<T>(args: &[String], name: &str) -> Result<T, CliError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_optional_arg(args, name)?.ok_or_else(|| CliError::MissingRequiredArg {
        arg: name.to_string(),
    })
}

fn parse_optional_arg<T>(args: &[String], name: &str) -> Result<Option<T>, CliError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    flag_value(args, name)?
        .map(|raw| {
            raw.parse::<T>().map_err(|e| CliError::InvalidArgValue {
                arg: name.to_string(),
                error: format!("{e}"),
            })
        })
        .transpose()
}
