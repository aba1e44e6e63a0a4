use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::action::{Action, ActionKind, ActionResult, DirEntry, EntryKind, ErrorCode};
use crate::config::Config;
use crate::paths::{PathResolver, ResolveError};

/// Performs canonical actions against the filesystem. Every failure is
/// reported through the returned [`ActionResult`].
#[derive(Debug, Clone)]
pub struct Executor {
    resolver: PathResolver,
    read_max_bytes: u64,
    allow_shell: bool,
}

impl Executor {
    pub fn new(resolver: PathResolver, read_max_bytes: u64, allow_shell: bool) -> Self {
        Self {
            resolver,
            read_max_bytes,
            allow_shell,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let resolver = PathResolver::new(cfg.base_dir.as_deref(), cfg.auto_resolve_bare_names)?;
        Ok(Self::new(resolver, cfg.read_max_bytes, cfg.allow_shell))
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub async fn execute(&self, action: &Action) -> ActionResult {
        let path = match action.path.as_deref().map(|p| self.resolver.resolve(p, None)) {
            None => None,
            Some(Ok(p)) => Some(p),
            Some(Err(err)) => return self.containment_failure(err, false),
        };
        let dest = match action.dest.as_deref().map(|d| self.resolver.resolve(d, None)) {
            None => None,
            Some(Ok(d)) => Some(d),
            Some(Err(err)) => return self.containment_failure(err, true),
        };

        debug!(action = %action.kind, path = ?path, dest = ?dest, "executing action");

        let content = action.content.as_deref().unwrap_or("");
        let outcome = match (&action.kind, &path) {
            (ActionKind::Shell, _) => return self.shell(action.command.as_deref()).await,
            (ActionKind::None, _) => return ActionResult::skipped("no-op"),
            (ActionKind::Unknown(name), _) => {
                return ActionResult::failure(
                    ErrorCode::UnknownAction,
                    format!("Unknown action: {name}"),
                );
            }
            (ActionKind::Rename | ActionKind::Move, _) => {
                let (Some(path), Some(dest)) = (&path, &dest) else {
                    return ActionResult::failure(
                        ErrorCode::MissingArgs,
                        "path and dest required for rename/move",
                    );
                };
                move_path(path, dest).await
            }
            (kind, None) => {
                return ActionResult::failure(
                    ErrorCode::MissingPath,
                    format!("path required for {kind}"),
                );
            }
            (ActionKind::List, Some(path)) => list(path).await,
            (ActionKind::Read, Some(path)) => read(path, self.read_max_bytes).await,
            (ActionKind::Write, Some(path)) => write_atomic(path, content).await,
            (ActionKind::Append, Some(path)) => append(path, content).await,
            (ActionKind::Touch, Some(path)) => touch(path).await,
            (ActionKind::Delete, Some(path)) => delete(path).await,
            (ActionKind::Mkdir, Some(path)) => mkdir(path).await,
        };

        match outcome {
            Ok(result) => {
                debug!(action = %action.kind, ok = result.ok, code = ?result.code, "action finished");
                result
            }
            Err(err) => {
                warn!(action = %action.kind, path = ?path, error = %err, "filesystem action failed");
                ActionResult {
                    dest,
                    ..ActionResult::failure(ErrorCode::from_io(&err), err.to_string()).at(path)
                }
            }
        }
    }

    fn containment_failure(&self, err: ResolveError, is_dest: bool) -> ActionResult {
        match err {
            ResolveError::OutsideBase { path, base } => {
                warn!(path = %path.display(), base = %base.display(), "path outside base");
                let mut result = if is_dest {
                    ActionResult::failure(
                        ErrorCode::DestOutsideBase,
                        "Destination outside allowed base",
                    )
                } else {
                    ActionResult::failure(ErrorCode::OutsideBase, "Path outside allowed base")
                };
                if is_dest {
                    result.dest = Some(path);
                } else {
                    result.path = Some(path);
                }
                result.base = Some(base);
                result
            }
            ResolveError::Invalid(message) => ActionResult::failure(
                ErrorCode::PathValidationFailed,
                format!("Path validation failed: {message}"),
            ),
        }
    }

    async fn shell(&self, command: Option<&str>) -> ActionResult {
        let Some(command) = command else {
            return ActionResult::failure(ErrorCode::MissingCommand, "command required for shell");
        };
        if !self.allow_shell {
            return ActionResult::failure(
                ErrorCode::ShellDisabled,
                "Shell actions are disabled (set allow_shell = true to enable)",
            );
        }
        warn!(command, "running shell command outside path containment");
        match run_shell_command(command).await {
            Ok(result) => result,
            Err(err) => ActionResult::failure(ErrorCode::from_io(&err), err.to_string()),
        }
    }
}

async fn list(path: &Path) -> io::Result<ActionResult> {
    if !fs::try_exists(path).await? {
        return Ok(not_found(path, "Path not found"));
    }
    let mut dir = fs::read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let kind = if entry.file_type().await?.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            kind,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ActionResult {
        entries: Some(entries),
        ..ActionResult::success(path.to_path_buf())
    })
}

async fn read(path: &Path, max_bytes: u64) -> io::Result<ActionResult> {
    let meta = match fs::metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(not_found(path, "File not found"));
        }
        Err(err) => return Err(err),
    };
    if meta.is_dir() {
        return Ok(
            ActionResult::failure(ErrorCode::IsDir, "Path is a directory").at(Some(path.to_path_buf()))
        );
    }
    if meta.len() > max_bytes {
        return Ok(ActionResult {
            size: Some(meta.len()),
            ..ActionResult::failure(
                ErrorCode::TooLarge,
                format!("File too large ({} bytes, limit {max_bytes})", meta.len()),
            )
            .at(Some(path.to_path_buf()))
        });
    }
    let bytes = fs::read(path).await?;
    Ok(ActionResult {
        content: Some(String::from_utf8_lossy(&bytes).to_string()),
        size: Some(bytes.len() as u64),
        ..ActionResult::success(path.to_path_buf())
    })
}

/// Writes through a temporary sibling and renames it over the target, so the
/// target only ever holds the old or the new content.
async fn write_atomic(path: &Path, content: &str) -> io::Result<ActionResult> {
    ensure_parent_dir(path).await?;
    let tmp = temp_sibling(path);
    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(ActionResult::success(path.to_path_buf()))
}

async fn append(path: &Path, content: &str) -> io::Result<ActionResult> {
    ensure_parent_dir(path).await?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(ActionResult::success(path.to_path_buf()))
}

async fn touch(path: &Path) -> io::Result<ActionResult> {
    ensure_parent_dir(path).await?;
    if !fs::try_exists(path).await? {
        fs::File::create(path).await?;
    } else if let Ok(file) = fs::OpenOptions::new().append(true).open(path).await {
        let file = file.into_std().await;
        if let Err(err) = file.set_modified(SystemTime::now()) {
            debug!(path = %path.display(), error = %err, "could not update mtime");
        }
    }
    Ok(ActionResult::success(path.to_path_buf()))
}

async fn delete(path: &Path) -> io::Result<ActionResult> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(not_found(path, "Path not found"));
        }
        Err(err) => return Err(err),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(ActionResult::success(path.to_path_buf()))
}

async fn mkdir(path: &Path) -> io::Result<ActionResult> {
    fs::create_dir_all(path).await?;
    Ok(ActionResult::success(path.to_path_buf()))
}

async fn move_path(path: &Path, dest: &Path) -> io::Result<ActionResult> {
    if !fs::try_exists(path).await? {
        return Ok(not_found(path, "Source not found"));
    }
    ensure_parent_dir(dest).await?;
    fs::rename(path, dest).await?;
    Ok(ActionResult::success(dest.to_path_buf()))
}

pub async fn run_shell_command(command: &str) -> io::Result<ActionResult> {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut cmd = Command::new("powershell");
        cmd.args(["-NoProfile", "-Command", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-lc", command]);
        cmd
    };
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();
    let mut result = if output.status.success() {
        ActionResult {
            ok: true,
            ..Default::default()
        }
    } else {
        ActionResult::failure(
            ErrorCode::CommandFailed,
            format!("Command exited with status {}", output.status),
        )
    };
    result.stdout = Some(stdout);
    result.stderr = Some(stderr);
    result.exit_code = exit_code;
    Ok(result)
}

async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!("{name}.tmp-{}-{nanos}", std::process::id()))
}

fn not_found(path: &Path, message: &str) -> ActionResult {
    ActionResult::failure(ErrorCode::NotFound, message).at(Some(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> Executor {
        let base = dir.path().to_path_buf();
        let resolver = PathResolver::with_anchors(&base, &base, Some(base.clone()), true);
        Executor::new(resolver, 16, false)
    }

    fn code(result: &ActionResult) -> Option<&str> {
        result.code.as_ref().map(|c| c.as_str())
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let action = Action::new(ActionKind::Mkdir, "a/b/c");
        let first = exec.execute(&action).await;
        let second = exec.execute(&action).await;
        assert!(first.ok, "{first:?}");
        assert!(second.ok, "{second:?}");
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let dir = TempDir::new().unwrap();
        stdfs::create_dir_all(dir.path().join("d/inner")).unwrap();
        stdfs::write(dir.path().join("d/inner/f.txt"), "x").unwrap();
        let exec = executor(&dir);
        let action = Action::new(ActionKind::Delete, "d");
        assert!(exec.execute(&action).await.ok);
        let second = exec.execute(&action).await;
        assert!(!second.ok);
        assert_eq!(code(&second), Some("NOT_FOUND"));
        assert!(!dir.path().join("d").exists());
    }

    #[tokio::test]
    async fn test_write_replaces_content_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        stdfs::write(dir.path().join("f.txt"), "old content").unwrap();

        let result = exec
            .execute(&Action::new(ActionKind::Write, "f.txt").with_content("new"))
            .await;
        assert!(result.ok, "{result:?}");
        assert_eq!(result.path, Some(dir.path().join("f.txt")));
        assert_eq!(stdfs::read_to_string(dir.path().join("f.txt")).unwrap(), "new");

        let names: Vec<_> = stdfs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["f.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_prior_target() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        // The target is a non-empty directory, so the final rename fails.
        stdfs::create_dir_all(dir.path().join("out.txt/keep")).unwrap();
        let result = exec
            .execute(&Action::new(ActionKind::Write, "out.txt").with_content("data"))
            .await;
        assert!(!result.ok);
        assert!(result.is_error());
        assert!(dir.path().join("out.txt/keep").is_dir());
        let leftovers = stdfs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_append_extends() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        exec.execute(&Action::new(ActionKind::Write, "x/y/log.txt").with_content("a"))
            .await;
        let result = exec
            .execute(&Action::new(ActionKind::Append, "x/y/log.txt").with_content("b"))
            .await;
        assert!(result.ok);
        assert_eq!(
            stdfs::read_to_string(dir.path().join("x/y/log.txt")).unwrap(),
            "ab"
        );
    }

    #[tokio::test]
    async fn test_read_limits() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        stdfs::write(dir.path().join("small.txt"), "hello").unwrap();
        stdfs::write(dir.path().join("big.txt"), "0123456789abcdefXYZ").unwrap();
        stdfs::create_dir(dir.path().join("folder")).unwrap();

        let ok = exec.execute(&Action::new(ActionKind::Read, "small.txt")).await;
        assert_eq!(ok.content.as_deref(), Some("hello"));

        let big = exec.execute(&Action::new(ActionKind::Read, "big.txt")).await;
        assert_eq!(code(&big), Some("TOO_LARGE"));
        assert_eq!(big.size, Some(19));
        assert!(big.content.is_none());

        let folder = exec.execute(&Action::new(ActionKind::Read, "folder")).await;
        assert_eq!(code(&folder), Some("IS_DIR"));

        let missing = exec.execute(&Action::new(ActionKind::Read, "nope.txt")).await;
        assert_eq!(code(&missing), Some("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_list_entries() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        stdfs::create_dir(dir.path().join("sub")).unwrap();
        stdfs::write(dir.path().join("a.txt"), "").unwrap();

        let result = exec.execute(&Action::new(ActionKind::List, ".")).await;
        assert!(result.ok);
        let entries = result.entries.unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "a.txt".into(),
                    kind: EntryKind::File
                },
                DirEntry {
                    name: "sub".into(),
                    kind: EntryKind::Dir
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_containment_errors() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base");
        stdfs::create_dir_all(&base).unwrap();
        let resolver = PathResolver::with_anchors(&base, &base, Some(base.clone()), true);
        let exec = Executor::new(resolver, 1024, false);

        let outside = exec
            .execute(&Action::new(ActionKind::Write, "../escape.txt").with_content("x"))
            .await;
        assert_eq!(code(&outside), Some("OUTSIDE_BASE"));
        assert_eq!(outside.base.as_deref(), Some(base.as_path()));
        assert!(!dir.path().join("escape.txt").exists());

        stdfs::write(base.join("in.txt"), "x").unwrap();
        let dest = exec
            .execute(&Action::new(ActionKind::Move, "in.txt").with_dest("../out.txt"))
            .await;
        assert_eq!(code(&dest), Some("DEST_OUTSIDE_BASE"));
        assert!(base.join("in.txt").exists());
    }

    #[tokio::test]
    async fn test_move_and_missing_args() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        stdfs::write(dir.path().join("a.txt"), "x").unwrap();

        let moved = exec
            .execute(&Action::new(ActionKind::Move, "a.txt").with_dest("nested/b.txt"))
            .await;
        assert!(moved.ok, "{moved:?}");
        assert_eq!(moved.path, Some(dir.path().join("nested/b.txt")));
        assert!(!dir.path().join("a.txt").exists());

        let missing = exec.execute(&Action::new(ActionKind::Rename, "b.txt")).await;
        assert_eq!(code(&missing), Some("MISSING_ARGS"));

        let gone = exec
            .execute(&Action::new(ActionKind::Rename, "ghost.txt").with_dest("g2.txt"))
            .await;
        assert_eq!(code(&gone), Some("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_tilde_dest_uses_resolver_home() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        stdfs::write(dir.path().join("a.txt"), "x").unwrap();

        let moved = exec
            .execute(&Action::new(ActionKind::Move, "~/a.txt").with_dest("~/moved.txt"))
            .await;
        assert!(moved.ok, "{moved:?}");
        assert_eq!(moved.path, Some(dir.path().join("moved.txt")));
        assert_eq!(stdfs::read_to_string(dir.path().join("moved.txt")).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_rename_onto_non_empty_dir_fails() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        stdfs::create_dir_all(dir.path().join("src_dir")).unwrap();
        stdfs::create_dir_all(dir.path().join("dst_dir/child")).unwrap();

        let result = exec
            .execute(&Action::new(ActionKind::Rename, "src_dir").with_dest("dst_dir"))
            .await;
        assert!(!result.ok);
        assert!(result.is_error());
        assert!(dir.path().join("src_dir").is_dir());
        assert!(dir.path().join("dst_dir/child").is_dir());
    }

    #[tokio::test]
    async fn test_touch_creates_then_keeps_content() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let action = Action::new(ActionKind::Touch, "t/new.txt");
        assert!(exec.execute(&action).await.ok);
        assert_eq!(stdfs::read_to_string(dir.path().join("t/new.txt")).unwrap(), "");

        stdfs::write(dir.path().join("t/new.txt"), "keep").unwrap();
        assert!(exec.execute(&action).await.ok);
        assert_eq!(
            stdfs::read_to_string(dir.path().join("t/new.txt")).unwrap(),
            "keep"
        );
    }

    #[tokio::test]
    async fn test_none_unknown_and_missing_fields() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let none = exec
            .execute(&Action {
                kind: ActionKind::None,
                path: None,
                content: None,
                dest: None,
                command: None,
            })
            .await;
        assert!(!none.ok);
        assert!(!none.is_error());
        assert_eq!(none.reason.as_deref(), Some("no-op"));

        let unknown = exec
            .execute(&Action::new(ActionKind::Unknown("chmod".into()), "a.sh"))
            .await;
        assert_eq!(code(&unknown), Some("UNKNOWN_ACTION"));

        let mut no_path = Action::new(ActionKind::Write, "x");
        no_path.path = None;
        assert_eq!(code(&exec.execute(&no_path).await), Some("MISSING_PATH"));

        let invalid = exec.execute(&Action::new(ActionKind::Mkdir, "a\0b")).await;
        assert_eq!(code(&invalid), Some("PATH_VALIDATION_FAILED"));
    }

    #[tokio::test]
    async fn test_shell_is_gated() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let mut action = Action::new(ActionKind::Shell, ".");
        action.path = None;
        action.command = Some("echo hi".into());
        assert_eq!(code(&exec.execute(&action).await), Some("SHELL_DISABLED"));

        action.command = None;
        assert_eq!(code(&exec.execute(&action).await), Some("MISSING_COMMAND"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runs_when_allowed() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_path_buf();
        let resolver = PathResolver::with_anchors(&base, &base, Some(base.clone()), true);
        let exec = Executor::new(resolver, 1024, true);
        let mut action = Action::new(ActionKind::Shell, ".");
        action.path = None;
        action.command = Some("echo hi".into());
        let result = exec.execute(&action).await;
        assert!(result.ok, "{result:?}");
        assert_eq!(result.stdout.as_deref().map(str::trim), Some("hi"));
        assert_eq!(result.exit_code, Some(0));

        action.command = Some("exit 3".into());
        let failed = exec.execute(&action).await;
        assert_eq!(code(&failed), Some("COMMAND_FAILED"));
        assert_eq!(failed.exit_code, Some(3));
    }
}
