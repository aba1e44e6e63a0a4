//! Request pipeline: prompt in, streamed reply and executed actions out.
//!
//! A run moves through [`Stage`]s in order. The reply is the only part that
//! is streamed; actions are extracted from a second model call, normalized,
//! capped, and executed with directory creations first.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionKind, ActionRecord, ActionResult, ErrorCode, RawAction, normalize};
use crate::config::{Config, PromptMode, build_system_prompt};
use crate::fs_tools::Executor;
use crate::llm::{ChatMessage, ChatModel, LocalModel};
use crate::oplog::{JsonlOpLog, OperationRecord, OperationSink};
use crate::parser::{
    flatten_actions, looks_shell_like, parse_actions_from_text, quick_shell_to_actions,
    strip_fences,
};
use crate::paths::{expand_tilde_str, looks_like_file, normalize_lexically};
use crate::util::prefix_chars;

const REPLY_FALLBACK_CHARS: usize = 1200;
const RAW_LOG_CHARS: usize = 1000;

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b[\w\-.]+\.(?:py|js|ts|java|cpp|c|go|rb|sh|txt|md|json|html|css|rs|toml|yaml|yml|csv)\b",
    )
    .expect("valid filename regex")
});

static FOLDER_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:in|inside|under|at)\s+(?:"([^"]+)"|'([^']+)'|([A-Za-z0-9_\-/~.]+))"#)
        .expect("valid folder hint regex")
});

const FOLDER_STOPWORDS: &[&str] = &[
    "it", "the", "a", "an", "this", "that", "there", "here", "my", "your", "same", "them", "once",
    "least", "all",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    ModelReplyStreaming,
    ActionsExtracted,
    ActionsExecuting,
    Complete,
    Errored,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::ModelReplyStreaming => "model_reply_streaming",
            Stage::ActionsExtracted => "actions_extracted",
            Stage::ActionsExecuting => "actions_executing",
            Stage::Complete => "complete",
            Stage::Errored => "errored",
        }
    }
}

/// Receives reply text as it streams, plus stage transitions.
pub trait ReplySink: Send {
    fn delta(&mut self, text: &str);

    fn stage(&mut self, _stage: Stage) {}
}

/// Sink that drops everything.
pub struct NullSink;

impl ReplySink for NullSink {
    fn delta(&mut self, _text: &str) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AttachedFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PromptRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub files: Vec<AttachedFile>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.push(AttachedFile {
            name: name.into(),
            content: content.into(),
        });
        self
    }

    fn prompt_text(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Accepts any JSON value; only strings survive.
fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub reply: Option<String>,
    pub results: Vec<ActionRecord>,
    pub raw: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Prompt required")]
    EmptyPrompt,
    #[error("Too many actions ({count}); the limit is {limit}")]
    TooManyActions {
        count: usize,
        limit: usize,
        raw: String,
    },
    #[error("Model call failed: {message}")]
    Model { message: String },
}

impl PipelineError {
    /// Raw model text worth returning for diagnostics.
    pub fn raw(&self) -> Option<&str> {
        match self {
            PipelineError::TooManyActions { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Whether the caller sent something unusable, as opposed to an upstream failure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, PipelineError::Model { .. })
    }
}

pub struct Pipeline {
    model: Arc<dyn ChatModel>,
    executor: Executor,
    max_actions: usize,
    reply_prompt: String,
    actions_prompt: String,
    convert_prompt: String,
    oplog: Option<Arc<dyn OperationSink>>,
}

impl Pipeline {
    pub fn new(cfg: &Config, model: Arc<dyn ChatModel>, executor: Executor) -> Self {
        let base = executor.resolver().base().to_path_buf();
        Self {
            model,
            max_actions: cfg.max_actions,
            reply_prompt: build_system_prompt(cfg, &base, PromptMode::Reply),
            actions_prompt: build_system_prompt(cfg, &base, PromptMode::Actions),
            convert_prompt: build_system_prompt(cfg, &base, PromptMode::Convert),
            executor,
            oplog: None,
        }
    }

    /// Wires the local model, the executor and the optional operation log.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let model = Arc::new(LocalModel::from_config(cfg)?);
        let executor = Executor::from_config(cfg)?;
        let mut pipeline = Self::new(cfg, model, executor);
        if let Some(path) = &cfg.op_log {
            let log = JsonlOpLog::open(expand_tilde_str(&path.to_string_lossy()))?;
            info!(path = %log.path().display(), "operation log enabled");
            pipeline = pipeline.with_oplog(Arc::new(log));
        }
        Ok(pipeline)
    }

    pub fn with_oplog(mut self, oplog: Arc<dyn OperationSink>) -> Self {
        self.oplog = Some(oplog);
        self
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn max_actions(&self) -> usize {
        self.max_actions
    }

    pub async fn run(
        &self,
        req: &PromptRequest,
        sink: &mut dyn ReplySink,
    ) -> Result<CommandOutcome, PipelineError> {
        enter(sink, Stage::Received);
        let result = self.run_stages(req, sink).await;
        match &result {
            Ok(_) => enter(sink, Stage::Complete),
            Err(err) => {
                warn!(error = %err, "command failed");
                enter(sink, Stage::Errored);
            }
        }
        result
    }

    async fn run_stages(
        &self,
        req: &PromptRequest,
        sink: &mut dyn ReplySink,
    ) -> Result<CommandOutcome, PipelineError> {
        let prompt = req.prompt_text().ok_or(PipelineError::EmptyPrompt)?;
        let user_message = compose_user_message(prompt, &req.files);

        enter(sink, Stage::ModelReplyStreaming);
        let reply_messages = [
            ChatMessage::system(&self.reply_prompt),
            ChatMessage::user(&user_message),
        ];
        let reply = {
            let mut forward = |delta: &str| sink.delta(delta);
            self.model
                .complete_stream(&reply_messages, &mut forward)
                .await
                .map_err(model_error)?
        };

        let action_messages = [
            ChatMessage::system(&self.actions_prompt),
            ChatMessage::user(&user_message),
        ];
        let raw = self
            .model
            .complete(&action_messages)
            .await
            .map_err(model_error)?;
        info!(raw = %prefix_chars(&raw, RAW_LOG_CHARS), "model actions output");

        let (values, reply_prefix) = self.extract_actions(&raw).await;
        enter(sink, Stage::ActionsExtracted);

        let mut planned = plan_actions(&values);
        for action in infer_missing_files(prompt, &planned, &self.executor) {
            info!(path = ?action.path, "adding inferred file creation");
            planned.push(Some(action));
        }

        if planned.len() > self.max_actions {
            return Err(PipelineError::TooManyActions {
                count: planned.len(),
                limit: self.max_actions,
                raw,
            });
        }

        enter(sink, Stage::ActionsExecuting);
        let results = execute_actions(&self.executor, planned).await;
        self.record_operations(prompt, &results);

        let mut reply_text = reply.trim().to_string();
        if reply_text.is_empty() {
            reply_text = reply_prefix;
        }
        if results.is_empty() && reply_text.is_empty() {
            reply_text = prefix_chars(&strip_fences(&raw), REPLY_FALLBACK_CHARS);
        }

        Ok(CommandOutcome {
            ok: true,
            reply: (!reply_text.is_empty()).then_some(reply_text),
            results,
            raw,
        })
    }

    /// Parser first, then the shell recognizer, then a conversion call.
    /// Stops at the first stage that yields anything.
    async fn extract_actions(&self, raw: &str) -> (Vec<Value>, String) {
        let parsed = parse_actions_from_text(raw);
        let actions = flatten_actions(parsed.actions);
        if !actions.is_empty() {
            debug!(count = actions.len(), "parsed actions from model output");
            return (actions, parsed.reply_prefix);
        }

        let quick = quick_shell_to_actions(raw);
        if !quick.is_empty() {
            info!(count = quick.len(), "recovered actions from shell commands");
            return (quick, parsed.reply_prefix);
        }

        if !looks_shell_like(raw) {
            return (Vec::new(), parsed.reply_prefix);
        }

        let messages = [
            ChatMessage::system(&self.convert_prompt),
            ChatMessage::user(raw),
        ];
        match self.model.complete(&messages).await {
            Ok(converted) => {
                let actions = flatten_actions(parse_actions_from_text(&converted).actions);
                info!(count = actions.len(), "conversion pass finished");
                (actions, parsed.reply_prefix)
            }
            Err(err) => {
                warn!(error = %err, "conversion pass failed");
                (Vec::new(), parsed.reply_prefix)
            }
        }
    }

    fn record_operations(&self, prompt: &str, results: &[ActionRecord]) {
        let Some(oplog) = &self.oplog else {
            return;
        };
        for record in results {
            let entry = OperationRecord::now(prompt, record.action.as_ref(), &record.result);
            if let Err(err) = oplog.record(&entry) {
                warn!(error = %err, "failed to write operation log");
            }
        }
    }
}

/// Runs directory creations together first, then everything else one at a
/// time in order. `None` entries stand for model output that was not an
/// action object.
pub async fn execute_actions(executor: &Executor, planned: Vec<Option<Action>>) -> Vec<ActionRecord> {
    let (mkdirs, others): (Vec<_>, Vec<_>) = planned
        .into_iter()
        .partition(|a| matches!(a, Some(action) if action.kind == ActionKind::Mkdir));

    let mkdirs: Vec<Action> = mkdirs.into_iter().flatten().collect();
    let mkdir_results = join_all(mkdirs.iter().map(|a| executor.execute(a))).await;

    let mut records: Vec<ActionRecord> = mkdirs
        .into_iter()
        .zip(mkdir_results)
        .map(|(action, result)| ActionRecord {
            action: Some(action),
            result,
        })
        .collect();

    for entry in others {
        let result = match &entry {
            Some(action) => executor.execute(action).await,
            None => ActionResult::failure(ErrorCode::NoAction, "invalid action object"),
        };
        records.push(ActionRecord {
            action: entry,
            result,
        });
    }
    records
}

/// Normalizes model-shaped values into planned actions.
pub fn plan_actions(values: &[Value]) -> Vec<Option<Action>> {
    values
        .iter()
        .map(|v| RawAction::from_value(v).map(normalize))
        .collect()
}

fn enter(sink: &mut dyn ReplySink, stage: Stage) {
    debug!(stage = stage.as_str(), "pipeline stage");
    sink.stage(stage);
}

fn model_error(err: anyhow::Error) -> PipelineError {
    PipelineError::Model {
        message: format!("{err:#}"),
    }
}

fn compose_user_message(prompt: &str, files: &[AttachedFile]) -> String {
    let mut out = prompt.to_string();
    for file in files {
        out.push_str(&format!(
            "\n\nAttached file: {}\n```\n{}\n```",
            file.name, file.content
        ));
    }
    out
}

/// Filenames mentioned in the prompt, in order of first appearance.
pub fn extract_filenames(prompt: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in FILENAME_RE.find_iter(prompt) {
        let name = m.as_str().trim_start_matches('.').to_string();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// A folder the prompt points at with "in/inside/under/at <name>".
pub fn find_mentioned_folder(prompt: &str) -> Option<String> {
    for caps in FOLDER_HINT_RE.captures_iter(prompt) {
        let Some(token) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let token = token.as_str().trim().trim_end_matches('.');
        if token.is_empty()
            || FOLDER_STOPWORDS.contains(&token.to_ascii_lowercase().as_str())
            || looks_like_file(token)
        {
            continue;
        }
        return Some(token.to_string());
    }
    None
}

/// Write actions for filenames the prompt names that no write or append
/// action already targets.
fn infer_missing_files(
    prompt: &str,
    planned: &[Option<Action>],
    executor: &Executor,
) -> Vec<Action> {
    let filenames = extract_filenames(prompt);
    if filenames.is_empty() {
        return Vec::new();
    }

    let resolver = executor.resolver();
    let last_mkdir = planned
        .iter()
        .flatten()
        .filter(|a| a.kind == ActionKind::Mkdir)
        .filter_map(|a| a.path.as_deref())
        .last()
        .map(str::to_string);
    let preferred: Option<PathBuf> = last_mkdir
        .or_else(|| find_mentioned_folder(prompt))
        .and_then(|folder| resolver.locate(&folder, None).ok());

    let covered = |name: &str| {
        planned.iter().flatten().any(|a| {
            matches!(a.kind, ActionKind::Write | ActionKind::Append)
                && a.path
                    .as_deref()
                    .and_then(|p| Path::new(p).file_name())
                    .is_some_and(|f| f.to_string_lossy() == name)
        })
    };

    let mut out = Vec::new();
    for name in filenames {
        if covered(&name) {
            continue;
        }
        let target = match &preferred {
            Some(folder) => Ok(normalize_lexically(&folder.join(&name))),
            None => resolver.locate(&name, None),
        };
        match target {
            Ok(path) => out.push(
                Action::new(ActionKind::Write, path.to_string_lossy().to_string())
                    .with_content(""),
            ),
            Err(err) => debug!(file = %name, error = %err, "skipping inferred file"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::paths::PathResolver;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        deltas: Vec<String>,
        stages: Vec<Stage>,
    }

    impl ReplySink for RecordingSink {
        fn delta(&mut self, text: &str) {
            self.deltas.push(text.to_string());
        }

        fn stage(&mut self, stage: Stage) {
            self.stages.push(stage);
        }
    }

    fn pipeline(dir: &TempDir, model: Arc<ScriptedModel>) -> Pipeline {
        pipeline_at(dir.path(), true, model)
    }

    fn pipeline_at(base: &Path, auto_resolve: bool, model: Arc<ScriptedModel>) -> Pipeline {
        let base = base.to_path_buf();
        let resolver = PathResolver::with_anchors(&base, &base, Some(base.clone()), auto_resolve);
        let executor = Executor::new(resolver, 1024 * 1024, false);
        Pipeline::new(&Config::default(), model, executor)
    }

    #[tokio::test]
    async fn test_empty_prompt_makes_no_model_call() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&["unused"]);
        let p = pipeline(&dir, model.clone());
        let mut sink = RecordingSink::default();

        let err = p.run(&PromptRequest::new("   "), &mut sink).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyPrompt));
        assert_eq!(model.call_count(), 0);
        assert_eq!(sink.stages, vec![Stage::Received, Stage::Errored]);

        let missing: PromptRequest = serde_json::from_str(r#"{"prompt": 42}"#).unwrap();
        assert!(p.run(&missing, &mut NullSink).await.is_err());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_demo_folder_with_python_file() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&[
            "I'll create the demo folder with hello.py inside.",
            r#"[{"action":"mkdir","path":"demo"},{"action":"write","path":"demo/hello.py","content":"print('hi')\n"}]"#,
        ]);
        let p = pipeline(&dir, model.clone());
        let mut sink = RecordingSink::default();

        let outcome = p
            .run(
                &PromptRequest::new(
                    "create a folder called demo and a file hello.py inside it that prints hi",
                ),
                &mut sink,
            )
            .await
            .unwrap();

        assert!(outcome.ok);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.result.ok), "{:?}", outcome.results);
        assert_eq!(
            outcome.results[0].action.as_ref().unwrap().kind,
            ActionKind::Mkdir
        );
        assert!(dir.path().join("demo").is_dir());
        assert_eq!(
            fs::read_to_string(dir.path().join("demo/hello.py")).unwrap(),
            "print('hi')\n"
        );
        assert_eq!(
            outcome.reply.as_deref(),
            Some("I'll create the demo folder with hello.py inside.")
        );
        assert_eq!(sink.deltas.concat(), "I'll create the demo folder with hello.py inside.");
        assert!(sink.deltas.len() > 1);
        assert_eq!(
            sink.stages,
            vec![
                Stage::Received,
                Stage::ModelReplyStreaming,
                Stage::ActionsExtracted,
                Stage::ActionsExecuting,
                Stage::Complete,
            ]
        );
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_shell_output_is_recovered_without_extra_call() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&[
            "Done.",
            "```bash\nmkdir -p notes\necho \"hello\" > notes/a.md\n```",
        ]);
        let p = pipeline(&dir, model.clone());

        let outcome = p
            .run(&PromptRequest::new("make a notes folder"), &mut NullSink)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(model.call_count(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("notes/a.md")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn test_conversion_pass_runs_for_shell_like_prose() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&[
            "Sure.",
            "You could use mkdir for that.",
            r#"[{"action":"mkdir","path":"converted"}]"#,
        ]);
        let p = pipeline(&dir, model.clone());

        let outcome = p
            .run(&PromptRequest::new("set up a converted folder"), &mut NullSink)
            .await
            .unwrap();
        assert_eq!(model.call_count(), 3);
        assert_eq!(outcome.results.len(), 1);
        assert!(dir.path().join("converted").is_dir());
    }

    #[tokio::test]
    async fn test_plain_prose_falls_back_to_raw_reply() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&["", "I am not sure what you mean."]);
        let p = pipeline(&dir, model.clone());

        let outcome = p
            .run(&PromptRequest::new("hmm"), &mut NullSink)
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.reply.as_deref(), Some("I am not sure what you mean."));
        assert_eq!(model.call_count(), 2);
    }

    fn mkdir_batch(n: usize) -> String {
        let items: Vec<String> = (0..n)
            .map(|i| format!(r#"{{"action":"mkdir","path":"d{i}"}}"#))
            .collect();
        format!("[{}]", items.join(","))
    }

    #[tokio::test]
    async fn test_action_cap() {
        let dir = TempDir::new().unwrap();
        let over = mkdir_batch(61);
        let model = ScriptedModel::new(&["ok", &over]);
        let p = pipeline(&dir, model);
        let mut sink = RecordingSink::default();

        let err = p
            .run(&PromptRequest::new("make folders"), &mut sink)
            .await
            .unwrap_err();
        match &err {
            PipelineError::TooManyActions { count, limit, raw } => {
                assert_eq!((*count, *limit), (61, 60));
                assert_eq!(raw, &over);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("61"));
        assert!(!dir.path().join("d0").exists());
        assert_eq!(sink.stages.last(), Some(&Stage::Errored));

        let exact = mkdir_batch(60);
        let model = ScriptedModel::new(&["ok", &exact]);
        let p = pipeline(&dir, model);
        let outcome = p
            .run(&PromptRequest::new("make folders"), &mut NullSink)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 60);
        assert!(dir.path().join("d59").is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_runs_before_other_actions() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&[
            "ok",
            r#"[{"action":"write","path":"b/c/f.txt","content":"x"},{"action":"mkdir","path":"b/c"},"junk"]"#,
        ]);
        let p = pipeline(&dir, model);

        let outcome = p
            .run(&PromptRequest::new("write f"), &mut NullSink)
            .await
            .unwrap();
        let kinds: Vec<_> = outcome
            .results
            .iter()
            .map(|r| r.action.as_ref().map(|a| a.kind.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![Some(ActionKind::Mkdir), Some(ActionKind::Write), None]
        );
        assert_eq!(
            outcome.results[2].result.code,
            Some(ErrorCode::NoAction)
        );
        assert_eq!(fs::read_to_string(dir.path().join("b/c/f.txt")).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_mentioned_files_are_created() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&[
            "Creating the project.",
            r#"[{"action":"mkdir","path":"proj"},{"action":"write","path":"proj/main.py","content":"print(1)"}]"#,
        ]);
        let p = pipeline(&dir, model);

        let outcome = p
            .run(
                &PromptRequest::new("make proj with main.py and a README.md"),
                &mut NullSink,
            )
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results.iter().all(|r| r.result.ok));
        assert_eq!(fs::read_to_string(dir.path().join("proj/README.md")).unwrap(), "");
        assert_eq!(
            fs::read_to_string(dir.path().join("proj/main.py")).unwrap(),
            "print(1)"
        );
    }

    #[tokio::test]
    async fn test_inferred_file_follows_mkdir_without_bare_name_lookup() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&["ok", r#"[{"action":"mkdir","path":"proj"}]"#]);
        let p = pipeline_at(dir.path(), false, model);

        let outcome = p
            .run(&PromptRequest::new("make proj with README.md"), &mut NullSink)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.result.ok));
        assert!(dir.path().join("proj/README.md").is_file());
        assert!(!dir.path().join("README.md").exists());
    }

    #[tokio::test]
    async fn test_escaping_action_is_skipped_and_rest_proceed() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base");
        fs::create_dir(&base).unwrap();
        let model = ScriptedModel::new(&[
            "ok",
            r#"[{"action":"write","path":"../escape.txt","content":"x"},{"action":"mkdir","path":"ok"},{"action":"write","path":"ok/a.txt","content":"a"}]"#,
        ]);
        let p = pipeline_at(&base, true, model);

        let outcome = p
            .run(&PromptRequest::new("write some notes"), &mut NullSink)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 3);

        let escaped = outcome
            .results
            .iter()
            .find(|r| r.action.as_ref().and_then(|a| a.path.as_deref()) == Some("../escape.txt"))
            .unwrap();
        assert_eq!(escaped.result.code, Some(ErrorCode::OutsideBase));
        assert_eq!(
            outcome.results.iter().filter(|r| r.result.ok).count(),
            2,
            "{:?}",
            outcome.results
        );
        assert!(!dir.path().join("escape.txt").exists());
        assert_eq!(fs::read_to_string(base.join("ok/a.txt")).unwrap(), "a");
    }

    #[tokio::test]
    async fn test_model_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&[]);
        let p = pipeline(&dir, model);
        let err = p
            .run(&PromptRequest::new("hello"), &mut NullSink)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Model { .. }));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_both_calls_see_attachments() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(&["Reading it.", r#"[{"action":"none"}]"#]);
        let p = pipeline(&dir, model.clone());
        let req = PromptRequest::new("what does this do").with_file("run.sh", "echo hi");

        let outcome = p.run(&req, &mut NullSink).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].result.reason.as_deref(), Some("no-op"));

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0][0].content.contains("Do not output JSON"));
        assert!(calls[1][0].content.contains("Return ONLY a single JSON array"));
        for call in &calls {
            assert_eq!(call[1].role, "user");
            assert!(call[1].content.contains("Attached file: run.sh"));
        }
    }

    #[test]
    fn test_attached_files_are_appended() {
        let msg = compose_user_message("summarize", &[AttachedFile {
            name: "a.txt".into(),
            content: "alpha".into(),
        }]);
        assert!(msg.starts_with("summarize"));
        assert!(msg.contains("Attached file: a.txt\n```\nalpha\n```"));
    }

    #[test]
    fn test_extract_filenames() {
        assert_eq!(
            extract_filenames("add main.py, utils.py and src/lib.rs; not a folder. main.py again"),
            vec!["main.py", "utils.py", "lib.rs"]
        );
        assert!(extract_filenames("make a folder named build").is_empty());
    }

    #[test]
    fn test_find_mentioned_folder() {
        assert_eq!(
            find_mentioned_folder("put app.js in the web folder").as_deref(),
            None
        );
        assert_eq!(
            find_mentioned_folder("create index.html inside site").as_deref(),
            Some("site")
        );
        assert_eq!(
            find_mentioned_folder("save it in \"my docs\"").as_deref(),
            Some("my docs")
        );
        assert_eq!(
            find_mentioned_folder("write notes in notes.txt under ~/work.").as_deref(),
            Some("~/work")
        );
    }
}
