#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::parser::CliError;

pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub flags: &'static [&'static str],
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "init-db",
        usage: "init-db",
        flags: &[],
    },
    CommandSpec {
        name: "enqueue",
        usage: "enqueue --project-path <path> --transcript-file <path> [--priority <n>] [--max-retries <n>]",
        flags: &["--project-path", "--transcript-file", "--priority", "--max-retries"],
    },
    CommandSpec {
        name: "get",
        usage: "get --id <job>",
        flags: &["--id"],
    },
    CommandSpec {
        name: "list",
        usage: "list [--status <status>] [--page <n>] [--page-size <n>]",
        flags: &["--status", "--page", "--page-size"],
    },
    CommandSpec {
        name: "stats",
        usage: "stats",
        flags: &[],
    },
    CommandSpec {
        name: "claim-next",
        usage: "claim-next",
        flags: &[],
    },
    CommandSpec {
        name: "heartbeat",
        usage: "heartbeat --id <job>",
        flags: &["--id"],
    },
    CommandSpec {
        name: "update",
        usage: "update --id <job> [--status <status>] [--phase <name>] [--priority <n>] [--error <msg>] [--actual-cost <usd>] [--manifest-path <path>] [--logs-path <path>]",
        flags: &[
            "--id",
            "--status",
            "--phase",
            "--priority",
            "--error",
            "--actual-cost",
            "--manifest-path",
            "--logs-path",
        ],
    },
    CommandSpec {
        name: "delete",
        usage: "delete --id <job>",
        flags: &["--id"],
    },
    CommandSpec {
        name: "events",
        usage: "events [--id <job>] [--type <event_type>] [--limit <n>]",
        flags: &["--id", "--type", "--limit"],
    },
    CommandSpec {
        name: "config-get",
        usage: "config-get --key <key>",
        flags: &["--key"],
    },
    CommandSpec {
        name: "config-set",
        usage: "config-set --key <key> --value <value> [--type string|int|float|bool|json] [--description <text>]",
        flags: &["--key", "--value", "--type", "--description"],
    },
    CommandSpec {
        name: "config-list",
        usage: "config-list",
        flags: &[],
    },
    CommandSpec {
        name: "reap",
        usage: "reap [--threshold-minutes <n>]",
        flags: &["--threshold-minutes"],
    },
    CommandSpec {
        name: "reaper",
        usage: "reaper [--interval-secs <n>]",
        flags: &["--interval-secs"],
    },
];

pub fn command_spec(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// # Errors
/// Returns `CliError::UnknownFlag` if a `--flag` is not accepted by the command.
pub fn ensure_no_unknown_flags(args: &[String], allowed_flags: &[&str]) -> Result<(), CliError> {
    let invalid = args
        .iter()
        .skip(1)
        .find(|arg| {
            arg.starts_with("--")
                && !matches!(arg.as_str(), "--help" | "--json")
                && !allowed_flags.iter().any(|allowed| allowed == &arg.as_str())
        })
        .cloned();

    invalid.map_or(Ok(()), |flag| Err(CliError::UnknownFlag { flag }))
}

#[must_use]
pub fn suggest_commands(typo: &str) -> Vec<String> {
    COMMANDS
        .iter()
        .map(|spec| (spec.name, strsim::levenshtein(typo, spec.name)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(cmd, _)| vec![cmd.to_string()])
        .unwrap_or_default()
}

#[must_use]
pub fn help_text() -> String {
    let commands = COMMANDS
        .iter()
        .map(|spec| format!("  {}", spec.usage))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "edq - editorial job queue\n\n\
         Usage: edq [--json] <command> [flags]\n\n\
         Commands:\n{commands}\n\n\
         Environment:\n  \
         EDQ_DATABASE_URL / DATABASE_URL   PostgreSQL connection string (required)\n  \
         EDQ_STALE_THRESHOLD_MINUTES       reaper fallback threshold (default 10)\n  \
         EDQ_REAPER_INTERVAL_SECS          reaper loop interval (default 60)\n  \
         EDQ_LOG_LEVEL / EDQ_LOG_FORMAT    log filter and pretty|json format"
    )
}
