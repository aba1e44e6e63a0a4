use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::commands::describe;
use crate::config::load_config_or_default;
use crate::fs_tools::Executor;
use crate::parser::flatten_actions;
use crate::pipeline::{execute_actions, plan_actions};
use crate::util::arg_or_stdin;

pub async fn handle_exec(json: Option<String>) -> Result<()> {
    let cfg = load_config_or_default()?;
    let text = arg_or_stdin(json, "JSON actions")?;
    let value: Value = serde_json::from_str(text.trim()).context("Invalid JSON actions")?;
    let values = flatten_actions(vec![value]);

    if values.len() > cfg.max_actions {
        bail!(
            "Too many actions ({}); the limit is {}",
            values.len(),
            cfg.max_actions
        );
    }

    let executor = Executor::from_config(&cfg)?;
    let records = execute_actions(&executor, plan_actions(&values)).await;
    for record in &records {
        println!("{}", describe(record));
    }
    Ok(())
}
