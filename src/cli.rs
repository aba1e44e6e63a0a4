use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::ApiStyle;

#[derive(Parser, Debug)]
#[command(
    name = "filewright",
    version,
    about = "Turn plain-language requests into file operations with a local model"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one prompt through the model and execute the resulting actions
    Run {
        prompt: String,
        /// Attach a text file to the prompt (repeatable)
        #[arg(long = "file", short = 'f')]
        files: Vec<PathBuf>,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract actions from model-style text without calling the model
    Parse {
        /// Text to parse; read from stdin when omitted
        text: Option<String>,
    },
    /// Execute a JSON action (or array of actions) directly
    Exec {
        /// JSON action list; read from stdin when omitted
        json: Option<String>,
    },
    /// Single file operations inside the base directory
    Fs {
        #[command(subcommand)]
        command: FsCommand,
    },
    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Check config, base directory and model server
    Doctor,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Initialize default config
    Init,
    /// Show current config (after environment overrides)
    Show,
    /// Set config fields manually
    Set {
        #[arg(long)]
        base_dir: Option<PathBuf>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, value_enum)]
        api_style: Option<ApiStyle>,
        #[arg(long)]
        api_key_env: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        max_actions: Option<usize>,
        #[arg(long)]
        read_max_bytes: Option<u64>,
        #[arg(long)]
        auto_resolve_bare_names: Option<bool>,
        /// Permit `shell` actions; they bypass the base directory check
        #[arg(long)]
        allow_shell: Option<bool>,
        /// JSONL operation log path; empty string disables it
        #[arg(long)]
        op_log: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
pub enum FsCommand {
    /// List a directory
    List {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Read a text file
    Read { path: String },
    /// Replace a file's content (stdin when no content is given)
    Write { path: String, content: Option<String> },
    /// Append to a file (stdin when no content is given)
    Append { path: String, content: Option<String> },
    /// Create an empty file or bump its modification time
    Touch { path: String },
    /// Remove a file or directory recursively
    Delete { path: String },
    /// Create a directory chain
    Mkdir { path: String },
    /// Move or rename a path
    Move { path: String, dest: String },
}
