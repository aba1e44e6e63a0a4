use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    /// Ollama `/api/chat`
    Ollama,
    /// OpenAI-compatible `/chat/completions` (llama.cpp server, LM Studio, vLLM)
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default = "default_read_max_bytes")]
    pub read_max_bytes: u64,
    #[serde(default = "default_true")]
    pub auto_resolve_bare_names: bool,
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
    #[serde(default)]
    pub allow_shell: bool,
    #[serde(default = "default_api_style")]
    pub api_style: ApiStyle,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub op_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: None,
            read_max_bytes: default_read_max_bytes(),
            auto_resolve_bare_names: true,
            max_actions: default_max_actions(),
            allow_shell: false,
            api_style: default_api_style(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: None,
            api_key: None,
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
            host: default_host(),
            port: default_port(),
            op_log: None,
        }
    }
}

fn default_read_max_bytes() -> u64 {
    5_000_000
}

fn default_true() -> bool {
    true
}

fn default_max_actions() -> usize {
    60
}

fn default_api_style() -> ApiStyle {
    ApiStyle::Ollama
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_stream_timeout_secs() -> u64 {
    900
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Cannot resolve home directory")?;
    Ok(home.join(".filewright"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Effective config: the file (created with defaults if missing) plus
/// environment overrides.
pub fn load_config_or_default() -> Result<Config> {
    let mut cfg = load_file_config_or_default()?;
    apply_env_overrides(&mut cfg, |key| env::var(key).ok());
    Ok(cfg)
}

/// The file values alone, for commands that write the config back.
pub fn load_file_config_or_default() -> Result<Config> {
    let path = config_path()?;
    if path.exists() {
        return load_config_from(&path);
    }
    let cfg = Config::default();
    save_config(&cfg)?;
    Ok(cfg)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&text).with_context(|| format!("Invalid config: {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir {}", parent.display()))?;
    }
    let text = toml::to_string_pretty(cfg)?;
    fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Applies environment overrides on top of the file values. Unparseable
/// values are ignored.
pub fn apply_env_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("FILE_OP_BASE") {
        cfg.base_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = get("READ_MAX_BYTES").and_then(|v| v.trim().parse().ok()) {
        cfg.read_max_bytes = v;
    }
    if let Some(v) = get("AUTO_RESOLVE_BARE_NAMES").and_then(|v| parse_bool(&v)) {
        cfg.auto_resolve_bare_names = v;
    }
    if let Some(v) = get("MAX_ACTIONS").and_then(|v| v.trim().parse().ok()) {
        cfg.max_actions = v;
    }
    if let Some(v) = get("OLLAMA_HOST") {
        cfg.base_url = v;
    }
    if let Some(v) = get("OLLAMA_MODEL") {
        cfg.model = v;
    }
    if let Some(v) = get("FILEWRIGHT_ALLOW_SHELL").and_then(|v| parse_bool(&v)) {
        cfg.allow_shell = v;
    }
    if let Some(v) = get("FILEWRIGHT_OP_LOG") {
        cfg.op_log = Some(PathBuf::from(v));
    }
    if let Some(v) = get("PORT").and_then(|v| v.trim().parse().ok()) {
        cfg.port = v;
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn resolve_api_key(cfg: &Config) -> Option<String> {
    if let Some(name) = &cfg.api_key_env
        && let Ok(v) = env::var(name)
        && !v.trim().is_empty()
    {
        return Some(v);
    }
    cfg.api_key.clone().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Reply,
    Actions,
    Convert,
}

pub fn build_system_prompt(cfg: &Config, base: &Path, mode: PromptMode) -> String {
    match mode {
        PromptMode::Reply => {
            let mut prompt = String::from(
                "You are a professional local file system assistant.\
                 \nReply to the user in concise natural language: say what you will create, change or remove.\
                 \nDo not output JSON and do not output shell commands; the file operations are carried out separately.",
            );
            prompt.push_str(&format!(
                "\nAll operations happen inside the base directory {}.",
                base.display()
            ));
            prompt
        }
        PromptMode::Actions => {
            let mut allowed = vec![
                "list", "read", "write", "append", "delete", "mkdir", "rename", "move", "none",
            ];
            if cfg.allow_shell {
                allowed.push("shell");
            }
            let mut prompt = String::from(
                "You convert a user's request into file system actions.\
                 \nReturn ONLY a single JSON array, nothing before or after it.\
                 \nEach element is an object: {\"action\": ..., \"path\": ..., \"content\": ..., \"dest\": ...}.",
            );
            prompt.push_str(&format!("\nAllowed actions: {}.", allowed.join(", ")));
            prompt.push_str(&format!(
                "\nPaths may be absolute, relative to {}, or start with \"~\".",
                base.display()
            ));
            prompt.push_str(
                "\n\"write\" needs the full file content; \"rename\" and \"move\" need \"dest\".\
                 \nCreate folders with \"mkdir\" before writing files into them.\
                 \nExample:\
                 \n[{\"action\":\"mkdir\",\"path\":\"~/Desktop/MyApp\"},{\"action\":\"write\",\"path\":\"~/Desktop/MyApp/main.py\",\"content\":\"print('hi')\"}]\
                 \nIf nothing needs to change, return [{\"action\":\"none\",\"reason\":\"unclear request\"}].",
            );
            if cfg.allow_shell {
                prompt.push_str(
                    "\nUse {\"action\":\"shell\",\"command\":...} only when no file action can do the job.",
                );
            } else {
                prompt.push_str("\nNever put shell commands inside the JSON.");
            }
            prompt
        }
        PromptMode::Convert => "You are a converter. Given the following instructions, return ONLY a JSON array of actions:\
             \n- Map mkdir X -> {\"action\":\"mkdir\",\"path\":\"X\"}\
             \n- Map touch f -> {\"action\":\"write\",\"path\":\"f\",\"content\":\"\"}\
             \n- Map echo \"X\" > f -> {\"action\":\"write\",\"path\":\"f\",\"content\":\"X\"}\
             \n- Map echo \"X\" >> f -> {\"action\":\"append\",\"path\":\"f\",\"content\":\"X\"}\
             \n- Map rm -rf p -> {\"action\":\"delete\",\"path\":\"p\"}\
             \n- Map mv a b -> {\"action\":\"move\",\"path\":\"a\",\"dest\":\"b\"}\
             \nReturn only JSON. If unsure return [{\"action\":\"none\",\"reason\":\"unclear request\"}]."
            .to_string(),
    }
}
