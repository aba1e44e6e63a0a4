mod config_cmd;
mod doctor_cmd;
mod exec_cmd;
mod fs_cmd;
mod parse_cmd;
mod run_cmd;
mod serve_cmd;

pub use config_cmd::handle_config;
pub use doctor_cmd::run_doctor;
pub use exec_cmd::handle_exec;
pub use fs_cmd::handle_fs;
pub use parse_cmd::handle_parse;
pub use run_cmd::run_prompt;
pub use serve_cmd::run_serve;

use crate::action::ActionRecord;
use crate::util::truncate_preview;

/// One line per executed action, for terminal output.
fn describe(record: &ActionRecord) -> String {
    let kind = record
        .action
        .as_ref()
        .map(|a| a.kind.to_string())
        .unwrap_or_else(|| "?".to_string());
    let target = record
        .result
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .or_else(|| record.action.as_ref().and_then(|a| a.path.clone()))
        .or_else(|| record.action.as_ref().and_then(|a| a.command.clone()))
        .unwrap_or_default();
    let result = &record.result;
    match (&result.code, &result.reason) {
        (Some(code), _) => format!(
            "[{code}] {kind} {target}: {}",
            truncate_preview(result.error.as_deref().unwrap_or(""), 160)
        ),
        (None, Some(reason)) => format!("[skip] {kind}: {reason}"),
        (None, None) => format!("[ok] {kind} {target}"),
    }
}
