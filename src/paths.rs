//! Path resolution for action targets.
//!
//! Every path an action touches goes through [`PathResolver::resolve`], which
//! anchors the raw string (tilde, absolute, relative, bare name) and then checks
//! that the result stays inside the configured base directory.

use std::env;
use std::path::{Component, MAIN_SEPARATOR, Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Path outside allowed base: {} (base {})", .path.display(), .base.display())]
    OutsideBase { path: PathBuf, base: PathBuf },
    #[error("Path validation failed: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
    home: PathBuf,
    cwd: Option<PathBuf>,
    auto_resolve_bare_names: bool,
}

impl PathResolver {
    /// Builds a resolver anchored at the real home and working directories.
    /// `base` defaults to the home directory.
    pub fn new(base: Option<&Path>, auto_resolve_bare_names: bool) -> Result<Self> {
        let home = dirs::home_dir().context("Cannot resolve home directory")?;
        let cwd = env::current_dir().ok();
        let base = base.map(Path::to_path_buf).unwrap_or_else(|| home.clone());
        Ok(Self::with_anchors(base, home, cwd, auto_resolve_bare_names))
    }

    /// Builds a resolver with explicit anchors. The heuristics depend on which
    /// of these directories exist, so tests pin them here.
    pub fn with_anchors(
        base: impl Into<PathBuf>,
        home: impl Into<PathBuf>,
        cwd: Option<PathBuf>,
        auto_resolve_bare_names: bool,
    ) -> Self {
        let home = home.into();
        let base = base.into();
        let base = match base.to_str() {
            Some(s) => expand_tilde(s, &home),
            None => base.clone(),
        };
        let base = if base.is_absolute() {
            normalize_lexically(&base)
        } else {
            let anchor = cwd.as_deref().unwrap_or(&home);
            normalize_lexically(&anchor.join(base))
        };
        Self {
            base,
            home,
            cwd,
            auto_resolve_bare_names,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// A base at the filesystem root disables the containment check.
    pub fn is_full_access(&self) -> bool {
        self.base.parent().is_none()
    }

    pub fn desktop(&self) -> Option<PathBuf> {
        let desktop = self.home.join("Desktop");
        desktop.is_dir().then_some(desktop)
    }

    /// Folder used for bare names when nothing better is known:
    /// Desktop, then the working directory, then the base.
    pub fn default_folder(&self) -> PathBuf {
        if let Some(desktop) = self.desktop() {
            return desktop;
        }
        match &self.cwd {
            Some(cwd) => cwd.clone(),
            None => self.base.clone(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.is_full_access() || path.starts_with(&self.base)
    }

    /// Anchors `raw` to an absolute path without the containment check.
    pub fn locate(&self, raw: &str, preferred: Option<&Path>) -> Result<PathBuf, ResolveError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolveError::Invalid("empty path".to_string()));
        }
        if raw.contains('\0') {
            return Err(ResolveError::Invalid(format!(
                "path contains a NUL byte: {:?}",
                raw
            )));
        }

        let expanded = expand_tilde(raw, &self.home);
        if expanded.is_absolute() {
            return Ok(normalize_lexically(&expanded));
        }

        if has_separator(raw) || raw == "." || raw == ".." || !self.auto_resolve_bare_names {
            return Ok(normalize_lexically(&self.base.join(&expanded)));
        }

        let anchor = match preferred {
            Some(folder) if has_extension(raw) => folder.to_path_buf(),
            _ => self.default_folder(),
        };
        Ok(normalize_lexically(&anchor.join(raw)))
    }

    /// Anchors `raw` and enforces that the result lies inside the base.
    pub fn resolve(&self, raw: &str, preferred: Option<&Path>) -> Result<PathBuf, ResolveError> {
        let path = self.locate(raw, preferred)?;
        if !self.contains(&path) {
            return Err(ResolveError::OutsideBase {
                path,
                base: self.base.clone(),
            });
        }
        Ok(path)
    }
}

pub fn expand_tilde(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Tilde expansion against the process home directory. Leaves the input alone
/// when no home directory is known.
pub fn expand_tilde_str(raw: &str) -> String {
    if !raw.starts_with('~') {
        return raw.to_string();
    }
    match dirs::home_dir() {
        Some(home) => expand_tilde(raw, &home).to_string_lossy().to_string(),
        None => raw.to_string(),
    }
}

/// Resolves `.` and `..` without touching the filesystem. `..` at the root
/// stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Last path segment contains a dot, e.g. `main.py` or `.env`.
pub fn looks_like_file(raw: &str) -> bool {
    let trimmed = raw.trim().trim_end_matches(['/', '\\']);
    let last = trimmed.rsplit(['/', '\\']).next().unwrap_or("");
    if last.is_empty() || last == "." || last == ".." {
        return false;
    }
    last.contains('.')
}

pub fn has_extension(name: &str) -> bool {
    Path::new(name).extension().is_some()
}

fn has_separator(raw: &str) -> bool {
    raw.contains('/') || raw.contains(MAIN_SEPARATOR)
}
