use anyhow::{Result, bail};

use crate::config::{ApiStyle, load_config_or_default};
use crate::llm::LocalModel;
use crate::paths::PathResolver;

pub async fn run_doctor() -> Result<()> {
    let cfg = load_config_or_default()?;
    println!("== filewright doctor ==");
    println!("Model: {} ({:?})", cfg.model, cfg.api_style);

    let resolver = PathResolver::new(cfg.base_dir.as_deref(), cfg.auto_resolve_bare_names)?;
    let base = resolver.base();
    if !base.is_dir() {
        bail!("Base directory does not exist: {}", base.display());
    }
    println!("[ok] base directory: {}", base.display());
    if resolver.is_full_access() {
        println!("[warn] base is the filesystem root; containment is disabled");
    }
    match resolver.desktop() {
        Some(desktop) => println!("[ok] bare names default to {}", desktop.display()),
        None => println!(
            "[ok] bare names default to {}",
            resolver.default_folder().display()
        ),
    }
    if cfg.allow_shell {
        println!("[warn] shell actions enabled; they are not confined to the base directory");
    }

    let _url = reqwest::Url::parse(&cfg.base_url)
        .map_err(|e| anyhow::anyhow!("Invalid base_url: {e}"))?;
    println!("[ok] base_url is valid URL");

    let model = LocalModel::from_config(&cfg)?;
    println!("Chat endpoint: {}", model.chat_url());
    model.check_availability().await?;
    match cfg.api_style {
        ApiStyle::Ollama => println!("[ok] model '{}' is available", model.model()),
        ApiStyle::Openai => println!("[ok] chat completion test succeeded"),
    }

    println!("doctor finished: healthy");
    Ok(())
}
