use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::load_config_or_default;
use crate::pipeline::Pipeline;
use crate::webui::run_web;

pub async fn run_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut cfg = load_config_or_default()?;
    if let Some(host) = host {
        cfg.host = host;
    }
    if let Some(port) = port {
        cfg.port = port;
    }

    let pipeline = Arc::new(Pipeline::from_config(&cfg)?);
    let resolver = pipeline.executor().resolver();
    info!(
        base = %resolver.base().display(),
        model = %cfg.model,
        max_actions = cfg.max_actions,
        "starting server"
    );
    if resolver.is_full_access() {
        warn!("base directory is the filesystem root; path containment is off");
    }
    if cfg.allow_shell {
        warn!("shell actions are enabled and are not confined to the base directory");
    }

    run_web(&cfg, pipeline).await
}
