use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::action::{Action, ActionResult};

/// One executed action as it is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord<'a> {
    pub prompt: &'a str,
    pub action: Option<&'a Action>,
    pub result: &'a ActionResult,
    pub created_at: String,
}

impl<'a> OperationRecord<'a> {
    pub fn now(prompt: &'a str, action: Option<&'a Action>, result: &'a ActionResult) -> Self {
        Self {
            prompt,
            action,
            result,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Write-only sink for executed operations.
pub trait OperationSink: Send + Sync {
    fn record(&self, record: &OperationRecord<'_>) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlOpLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlOpLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OperationSink for JsonlOpLog {
    fn record(&self, record: &OperationRecord<'_>) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to encode operation record")?;
        line.push('\n');
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn test_records_append_as_json_lines() {
        let dir = TempDir::new().unwrap();
        let log = JsonlOpLog::open(dir.path().join("logs/ops.jsonl")).unwrap();
        let action = Action::new(ActionKind::Mkdir, "demo");
        let result = ActionResult::success(dir.path().join("demo"));

        log.record(&OperationRecord::now("make demo", Some(&action), &result))
            .unwrap();
        log.record(&OperationRecord::now("again", None, &result)).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["prompt"], "make demo");
        assert_eq!(lines[0]["action"]["action"], "mkdir");
        assert_eq!(lines[0]["result"]["ok"], true);
        assert!(lines[0]["created_at"].as_str().unwrap().contains('T'));
        assert!(lines[1]["action"].is_null());
    }
}
