use anyhow::Result;
use serde_json::json;

use crate::parser::{flatten_actions, parse_actions_from_text, quick_shell_to_actions};
use crate::pipeline::plan_actions;
use crate::util::arg_or_stdin;

/// Shows what the parser and shell recognizer make of some text. Nothing is
/// executed and the model is not called.
pub fn handle_parse(text: Option<String>) -> Result<()> {
    let text = arg_or_stdin(text, "text")?;
    let parsed = parse_actions_from_text(&text);
    let mut source = "json";
    let mut values = flatten_actions(parsed.actions);
    if values.is_empty() {
        values = quick_shell_to_actions(&text);
        source = if values.is_empty() { "none" } else { "shell" };
    }

    let out = json!({
        "source": source,
        "reply_prefix": parsed.reply_prefix,
        "actions": plan_actions(&values),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
