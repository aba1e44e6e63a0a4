use anyhow::{Result, bail};

use crate::action::{Action, ActionKind, EntryKind};
use crate::cli::FsCommand;
use crate::config::load_config_or_default;
use crate::fs_tools::Executor;
use crate::util::arg_or_stdin;

pub async fn handle_fs(command: FsCommand) -> Result<()> {
    let cfg = load_config_or_default()?;
    let executor = Executor::from_config(&cfg)?;

    let action = match command {
        FsCommand::List { path } => Action::new(ActionKind::List, path),
        FsCommand::Read { path } => Action::new(ActionKind::Read, path),
        FsCommand::Write { path, content } => {
            Action::new(ActionKind::Write, path).with_content(arg_or_stdin(content, "content")?)
        }
        FsCommand::Append { path, content } => {
            Action::new(ActionKind::Append, path).with_content(arg_or_stdin(content, "content")?)
        }
        FsCommand::Touch { path } => Action::new(ActionKind::Touch, path),
        FsCommand::Delete { path } => Action::new(ActionKind::Delete, path),
        FsCommand::Mkdir { path } => Action::new(ActionKind::Mkdir, path),
        FsCommand::Move { path, dest } => Action::new(ActionKind::Move, path).with_dest(dest),
    };

    let result = executor.execute(&action).await;
    if let (Some(code), Some(error)) = (&result.code, &result.error) {
        bail!("{code}: {error}");
    }

    if let Some(content) = &result.content {
        print!("{content}");
    } else if let Some(entries) = &result.entries {
        for entry in entries {
            let marker = if entry.kind == EntryKind::Dir { "/" } else { "" };
            println!("{}{marker}", entry.name);
        }
    } else if let Some(path) = &result.path {
        println!("[ok] {} {}", action.kind, path.display());
    }
    Ok(())
}
