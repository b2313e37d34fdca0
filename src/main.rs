#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod cli;
mod commands;
mod output;

use cli::{help_text, parse_cli_args, suggest_commands, CliAction, CliError};
use edq::config::log_settings_from_env;
use edq::logging::init_tracing;
use output::{emit_cli_error, emit_error, map_error_to_exit_code, CLI_USAGE_EXIT_CODE};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let action = match parse_cli_args(&args) {
        Ok(action) => action,
        Err(err) => {
            let suggestions = match &err {
                CliError::UnknownCommand { cmd } => suggest_commands(cmd),
                _ => Vec::new(),
            };
            emit_cli_error(&err, &suggestions);
            return ExitCode::from(CLI_USAGE_EXIT_CODE);
        }
    };

    match action {
        CliAction::ShowHelp => {
            println!("{}", help_text());
            ExitCode::SUCCESS
        }
        CliAction::ShowVersion => {
            println!("edq {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        CliAction::Command { command, output } => {
            if let Err(err) = init_tracing(&log_settings_from_env()) {
                eprintln!("warning: {err}");
            }

            let name = command.name();
            match commands::run(command, output).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    emit_error(output, name, &err);
                    ExitCode::from(map_error_to_exit_code(&err))
                }
            }
        }
    }
}
