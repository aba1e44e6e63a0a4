use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{ApiStyle, Config, resolve_api_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// The chat-completion collaborator the pipeline talks to.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Streams the reply, handing each text delta to `on_delta` as it
    /// arrives. Returns the full text once the model signals completion.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String>;
}

pub struct LocalModel {
    style: ApiStyle,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    client: Client,
    stream_client: Client,
}

impl LocalModel {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let stream_client = Client::builder()
            .timeout(Duration::from_secs(cfg.stream_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            style: cfg.api_style,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key: resolve_api_key(cfg),
            temperature: cfg.temperature,
            client,
            stream_client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn chat_url(&self) -> String {
        chat_endpoint(self.style, &self.base_url)
    }

    /// Ollama: the server answers `/api/tags` and lists the model.
    /// OpenAI-compatible: a one-token completion succeeds.
    pub async fn check_availability(&self) -> Result<()> {
        match self.style {
            ApiStyle::Ollama => {
                let url = format!("{}/api/tags", self.base_url);
                let resp = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .with_context(|| format!("Model server not reachable at {}", self.base_url))?;
                if !resp.status().is_success() {
                    bail!("Model server returned {} for {}", resp.status(), url);
                }
                let tags: Value = resp.json().await.context("Invalid /api/tags response")?;
                let base_name = self.model.split(':').next().unwrap_or(&self.model);
                let found = tags
                    .get("models")
                    .and_then(|m| m.as_array())
                    .is_some_and(|models| {
                        models.iter().filter_map(|m| m.get("name")?.as_str()).any(|name| {
                            name == self.model || name.starts_with(&format!("{base_name}:"))
                        })
                    });
                if !found {
                    bail!(
                        "Model '{}' not found. Pull it with: ollama pull {}",
                        self.model,
                        self.model
                    );
                }
                Ok(())
            }
            ApiStyle::Openai => {
                self.complete(&[ChatMessage::user("ping")]).await?;
                Ok(())
            }
        }
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        match self.style {
            ApiStyle::Ollama => json!({
                "model": self.model,
                "messages": messages,
                "stream": stream,
                "options": {"temperature": self.temperature}
            }),
            ApiStyle::Openai => json!({
                "model": self.model,
                "messages": messages,
                "temperature": self.temperature,
                "stream": stream
            }),
        }
    }

    async fn send(&self, client: &Client, body: &Value) -> Result<reqwest::Response> {
        let url = self.chat_url();
        let mut req = client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.context("Failed to read response body")?;
            bail!("Model API error {}: {}", status, text);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for LocalModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.request_body(messages, false);
        let resp = self.send(&self.client, &body).await?;
        let text = resp.text().await.context("Failed to read response body")?;
        let val: Value = serde_json::from_str(&text).context("Invalid JSON response")?;
        let out = match self.style {
            ApiStyle::Ollama => extract_ollama_content(&val),
            ApiStyle::Openai => extract_content(&val),
        }
        .context("Cannot parse response content")?;
        debug!(model = %self.model, chars = out.len(), "model reply complete");
        Ok(out.trim().to_string())
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String> {
        let body = self.request_body(messages, true);
        let resp = self.send(&self.stream_client, &body).await?;
        let out = parse_stream_response(resp, self.style, on_delta).await?;
        Ok(out.trim().to_string())
    }
}

pub fn chat_endpoint(style: ApiStyle, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    match style {
        ApiStyle::Ollama => {
            if base.ends_with("/api/chat") {
                base.to_string()
            } else {
                format!("{base}/api/chat")
            }
        }
        ApiStyle::Openai => {
            if base.ends_with("/chat/completions") {
                base.to_string()
            } else if base.ends_with("/v1") {
                format!("{base}/chat/completions")
            } else {
                format!("{base}/v1/chat/completions")
            }
        }
    }
}

async fn parse_stream_response(
    mut resp: reqwest::Response,
    style: ApiStyle,
    on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
) -> Result<String> {
    let mut full = String::new();
    let mut decoder = LineDecoder::new(style);

    while let Some(chunk) = resp.chunk().await.context("Failed to read stream chunk")? {
        if decoder.feed(&chunk, &mut full, on_delta) {
            return Ok(full);
        }
    }
    decoder.finish(&mut full, on_delta);
    Ok(full)
}

/// Splits a streamed body into lines and pulls text deltas out of them.
/// Ollama streams NDJSON; OpenAI-compatible servers stream SSE `data:` lines.
/// Bytes are buffered until a full line arrives so multi-byte characters split
/// across chunks decode intact.
struct LineDecoder {
    style: ApiStyle,
    buffer: Vec<u8>,
}

impl LineDecoder {
    fn new(style: ApiStyle) -> Self {
        Self {
            style,
            buffer: Vec::new(),
        }
    }

    /// Returns true once the terminal signal has been seen.
    fn feed(
        &mut self,
        chunk: &[u8],
        full: &mut String,
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> bool {
        self.buffer.extend_from_slice(chunk);
        while let Some(idx) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=idx).collect();
            let text = String::from_utf8_lossy(&raw[..idx]);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            if self.handle_line(line, full, on_delta) {
                return true;
            }
        }
        false
    }

    fn finish(
        &mut self,
        full: &mut String,
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let line = rest.trim();
        if !line.is_empty() {
            self.handle_line(line, full, on_delta);
        }
    }

    fn handle_line(
        &self,
        line: &str,
        full: &mut String,
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> bool {
        let (delta, done) = match self.style {
            ApiStyle::Ollama => {
                let line = line.trim();
                if line.is_empty() {
                    return false;
                }
                let Ok(val) = serde_json::from_str::<Value>(line) else {
                    return false;
                };
                let done = val.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
                (extract_ollama_content(&val), done)
            }
            ApiStyle::Openai => {
                let Some(data) = line.strip_prefix("data:") else {
                    return false;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return true;
                }
                let Ok(val) = serde_json::from_str::<Value>(data) else {
                    return false;
                };
                (extract_delta_content(&val), false)
            }
        };
        if let Some(delta) = delta
            && !delta.is_empty()
        {
            on_delta(&delta);
            full.push_str(&delta);
        }
        done
    }
}

fn extract_ollama_content(value: &Value) -> Option<String> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| value.get("response"))
        .or_else(|| value.get("output"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

fn extract_delta_content(value: &Value) -> Option<String> {
    let content = value.get("choices")?.get(0)?.get("delta")?.get("content")?;
    text_from_content(content)
}

fn extract_content(value: &Value) -> Option<String> {
    let content = value.get("choices")?.get(0)?.get("message")?.get("content")?;
    text_from_content(content)
}

fn text_from_content(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let mut out = String::new();
            for item in items {
                if item.get("type").and_then(|t| t.as_str()) == Some("text")
                    && let Some(t) = item.get("text").and_then(|t| t.as_str())
                {
                    out.push_str(t);
                }
            }
            if out.is_empty() { None } else { Some(out) }
        }
        _ => None,
    }
}
