use std::path::PathBuf;

use anyhow::Result;

use crate::cli::ConfigCommand;
use crate::config::{
    Config, config_path, load_config_or_default, load_file_config_or_default, save_config,
};

pub fn handle_config(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Init => {
            let cfg = Config::default();
            save_config(&cfg)?;
            println!("Initialized config at {}", config_path()?.display());
        }
        ConfigCommand::Show => {
            let cfg = load_config_or_default()?;
            println!("{}", toml::to_string_pretty(&cfg)?);
            println!("Config path: {}", config_path()?.display());
            if cfg.allow_shell {
                println!("Note: shell actions are enabled and run outside the base directory check.");
            }
        }
        ConfigCommand::Set {
            base_dir,
            base_url,
            model,
            api_style,
            api_key_env,
            api_key,
            max_actions,
            read_max_bytes,
            auto_resolve_bare_names,
            allow_shell,
            op_log,
            host,
            port,
        } => {
            let mut cfg = load_file_config_or_default()?;
            if let Some(v) = base_dir {
                cfg.base_dir = Some(v);
            }
            if let Some(v) = base_url {
                cfg.base_url = v;
            }
            if let Some(v) = model {
                cfg.model = v;
            }
            if let Some(v) = api_style {
                cfg.api_style = v;
            }
            if let Some(v) = api_key_env {
                cfg.api_key_env = non_empty(v);
            }
            if let Some(v) = api_key {
                cfg.api_key = non_empty(v);
            }
            if let Some(v) = max_actions {
                cfg.max_actions = v;
            }
            if let Some(v) = read_max_bytes {
                cfg.read_max_bytes = v;
            }
            if let Some(v) = auto_resolve_bare_names {
                cfg.auto_resolve_bare_names = v;
            }
            if let Some(v) = allow_shell {
                cfg.allow_shell = v;
            }
            if let Some(v) = op_log {
                cfg.op_log = non_empty(v).map(PathBuf::from);
            }
            if let Some(v) = host {
                cfg.host = v;
            }
            if let Some(v) = port {
                cfg.port = v;
            }
            save_config(&cfg)?;
            println!("Config updated:");
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

fn non_empty(v: String) -> Option<String> {
    if v.trim().is_empty() { None } else { Some(v) }
}
