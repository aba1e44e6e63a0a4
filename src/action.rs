use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::paths::looks_like_file;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    List,
    Read,
    Write,
    Append,
    Touch,
    Delete,
    Mkdir,
    Rename,
    Move,
    Shell,
    None,
    Unknown(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::List => "list",
            ActionKind::Read => "read",
            ActionKind::Write => "write",
            ActionKind::Append => "append",
            ActionKind::Touch => "touch",
            ActionKind::Delete => "delete",
            ActionKind::Mkdir => "mkdir",
            ActionKind::Rename => "rename",
            ActionKind::Move => "move",
            ActionKind::Shell => "shell",
            ActionKind::None => "none",
            ActionKind::Unknown(name) => name,
        }
    }

    /// Maps a canonical name or one of its synonyms onto a kind. The `touch`
    /// synonyms land on `Write`; `Touch` is only built directly.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "list" | "ls" => ActionKind::List,
            "read" | "cat" => ActionKind::Read,
            "write" | "touch" | "create_file" | "createfile" => ActionKind::Write,
            "append" => ActionKind::Append,
            "mkdir" | "create_folder" | "create_dir" | "makedir" => ActionKind::Mkdir,
            "rm" | "rm -rf" | "rmdir" | "remove" | "delete" | "delete_folder" | "delete_dir"
            | "del" => ActionKind::Delete,
            "rename" => ActionKind::Rename,
            "move" | "mv" => ActionKind::Move,
            "shell" => ActionKind::Shell,
            "none" | "" => ActionKind::None,
            other => ActionKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A loosely-typed action descriptor as the model wrote it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAction {
    pub action: Option<String>,
    pub path: Option<String>,
    pub content: Option<String>,
    pub dest: Option<String>,
    pub command: Option<String>,
}

impl RawAction {
    /// Reads the known fields (and their aliases) out of a JSON object.
    /// Anything that is not an object yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        Some(Self {
            action: string_field(map, &["action", "type", "op"]),
            path: string_field(map, &["path", "file", "target"]),
            content: content_field(map),
            dest: string_field(map, &["dest", "destination", "to"]),
            command: string_field(map, &["command", "cmd"]),
        })
    }
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find_map(|v| v.as_str())
        .map(|s| s.to_string())
}

fn content_field(map: &Map<String, Value>) -> Option<String> {
    let value = ["content", "text"].iter().find_map(|k| map.get(*k))?;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => serde_json::to_string_pretty(other).ok(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    #[serde(rename = "action")]
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
            content: None,
            dest: None,
            command: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }
}

/// Canonicalizes a raw descriptor. No I/O happens here.
pub fn normalize(raw: RawAction) -> Action {
    let RawAction {
        action,
        path,
        mut content,
        dest,
        command,
    } = raw;

    let path = path
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    let name = action
        .map(|a| a.trim().to_ascii_lowercase())
        .filter(|a| !a.is_empty());

    let mut kind = match name.as_deref() {
        Some(name) => ActionKind::parse(name),
        None if path.as_deref().is_some_and(looks_like_file) => ActionKind::Write,
        None => ActionKind::None,
    };

    if matches!(name.as_deref(), Some("touch" | "create_file" | "createfile")) && content.is_none()
    {
        content = Some(String::new());
    }

    let file_like = path.as_deref().is_some_and(looks_like_file);
    if kind == ActionKind::Mkdir && file_like {
        kind = ActionKind::Write;
        content.get_or_insert_with(String::new);
    }
    if kind == ActionKind::Write && path.is_some() && !file_like && content.is_none() {
        kind = ActionKind::Mkdir;
    }

    Action {
        kind,
        path,
        content,
        dest: dest
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        command: command.filter(|c| !c.trim().is_empty()),
    }
}

/// Fixed error taxonomy reported in per-action results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    NoAction,
    MissingPath,
    MissingCommand,
    MissingArgs,
    OutsideBase,
    DestOutsideBase,
    PathValidationFailed,
    NotFound,
    IsDir,
    TooLarge,
    UnknownAction,
    ShellDisabled,
    CommandFailed,
    Io(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NoAction => "NO_ACTION",
            ErrorCode::MissingPath => "MISSING_PATH",
            ErrorCode::MissingCommand => "MISSING_COMMAND",
            ErrorCode::MissingArgs => "MISSING_ARGS",
            ErrorCode::OutsideBase => "OUTSIDE_BASE",
            ErrorCode::DestOutsideBase => "DEST_OUTSIDE_BASE",
            ErrorCode::PathValidationFailed => "PATH_VALIDATION_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::IsDir => "IS_DIR",
            ErrorCode::TooLarge => "TOO_LARGE",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
            ErrorCode::ShellDisabled => "SHELL_DISABLED",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::Io(code) => code,
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        use io::ErrorKind;
        let code = match err.kind() {
            ErrorKind::NotFound => "ENOENT",
            ErrorKind::PermissionDenied => "EACCES",
            ErrorKind::AlreadyExists => "EEXIST",
            ErrorKind::NotADirectory => "ENOTDIR",
            ErrorKind::IsADirectory => "EISDIR",
            ErrorKind::DirectoryNotEmpty => "ENOTEMPTY",
            ErrorKind::CrossesDevices => "EXDEV",
            ErrorKind::StorageFull => "ENOSPC",
            ErrorKind::ReadOnlyFilesystem => "EROFS",
            ErrorKind::InvalidInput => "EINVAL",
            _ => "ERR",
        };
        ErrorCode::Io(code.to_string())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<DirEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ActionResult {
    pub fn success(path: PathBuf) -> Self {
        Self {
            ok: true,
            path: Some(path),
            ..Default::default()
        }
    }

    pub fn failure(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn at(mut self, path: Option<PathBuf>) -> Self {
        self.path = path;
        self
    }

    pub fn is_error(&self) -> bool {
        self.code.is_some()
    }
}

/// One executed action paired with its outcome. `action` is `None` when the
/// model produced something that was not an action object at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub action: Option<Action>,
    pub result: ActionResult,
}
