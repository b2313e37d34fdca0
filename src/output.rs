use crate::cli::{CliError, OutputFormat};
use edq::error::{code, get_error_info};
use edq::QueueError;
use serde_json::{json, Value};

pub const CLI_USAGE_EXIT_CODE: u8 = 1;

pub fn emit_output(output: OutputFormat, command: &str, payload: &Value) {
    match output {
        OutputFormat::Text => payload
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| println!("{payload:#}"), |msg| println!("{msg}")),
        OutputFormat::Json => println!(
            "{}",
            json!({
                "command": command,
                "status": "ok",
                "payload": payload,
            })
        ),
    }
}

pub fn emit_error(output: OutputFormat, command: &str, error: &QueueError) {
    let fix = get_error_info(error.code()).map(|(_, fix)| fix);
    match output {
        OutputFormat::Text => {
            eprintln!("error[{}]: {error}", error.code());
            if let Some(fix) = fix {
                eprintln!("  hint: {fix}");
            }
        }
        OutputFormat::Json => println!(
            "{}",
            json!({
                "command": command,
                "status": "error",
                "error": {
                    "code": error.code(),
                    "message": error.to_string(),
                    "retryable": error.is_retryable(),
                    "fix": fix,
                },
            })
        ),
    }
}

pub fn emit_cli_error(error: &CliError, suggestions: &[String]) {
    eprintln!("error[{}]: {error}", code::CLI_ERROR);
    if let Some(suggestion) = suggestions.first() {
        eprintln!("  did you mean `{suggestion}`?");
    }
    eprintln!("  run `edq --help` for usage");
}

pub fn map_error_to_exit_code(error: &QueueError) -> u8 {
    u8::try_from(error.exit_code()).unwrap_or(CLI_USAGE_EXIT_CODE)
}
