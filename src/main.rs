mod action;
mod cli;
mod commands;
mod config;
mod fs_tools;
mod llm;
mod oplog;
mod parser;
mod paths;
mod pipeline;
mod util;
mod webui;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{
    handle_config, handle_exec, handle_fs, handle_parse, run_doctor, run_prompt, run_serve,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { host, port } => run_serve(host, port).await?,
        Commands::Run {
            prompt,
            files,
            json,
        } => run_prompt(&prompt, &files, json).await?,
        Commands::Parse { text } => handle_parse(text)?,
        Commands::Exec { json } => handle_exec(json).await?,
        Commands::Fs { command } => handle_fs(command).await?,
        Commands::Config { command } => handle_config(command)?,
        Commands::Doctor => run_doctor().await?,
    }

    Ok(())
}
