//! Raw per-task artifacts written during execution.
//!
//! Two independent streams per task, correlated later by the normalization
//! pipeline: `detections.json` (what the detector found) and
//! `actions.jsonl` (what the actor did, one JSON line per action).
//!
//! Action fields pass through secret redaction before they reach disk;
//! artifacts end up in reports and must not carry credentials.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SweepError;
use crate::task::DetectionRecord;

/// Raw detector artifact filename within a task directory.
pub const DETECTIONS_FILE: &str = "detections.json";

/// Raw actor log filename within a task directory.
pub const ACTIONS_FILE: &str = "actions.jsonl";

/// Where one task's raw artifacts live within a session directory.
pub fn task_dir(session_dir: &Path, task_name: &str) -> PathBuf {
    session_dir.join("tasks").join(task_name)
}

/// Outcome of a single action an actor performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// One line of an actor's raw execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub target: String,
    pub outcome: ActionOutcome,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(target: impl Into<String>, outcome: ActionOutcome) -> Self {
        Self {
            target: target.into(),
            outcome,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only writer for one task's action log.
pub struct ActionLog {
    path: PathBuf,
}

impl ActionLog {
    pub fn new(task_dir: &Path) -> Self {
        Self {
            path: task_dir.join(ACTIONS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one action record, redacting target and detail fields.
    pub fn append(&self, record: &ActionRecord) -> Result<(), SweepError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut sanitized = record.clone();
        sanitized.target = redact_secrets(&sanitized.target);
        sanitized.detail = sanitized.detail.as_deref().map(redact_secrets);

        let json = serde_json::to_string(&sanitized)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Write the detector's raw artifact for one task. Single writer; written
/// once after the detector returns.
pub fn write_detections(task_dir: &Path, records: &[DetectionRecord]) -> Result<PathBuf, SweepError> {
    fs::create_dir_all(task_dir)?;
    let path = task_dir.join(DETECTIONS_FILE);
    let json = serde_json::to_string_pretty(records)?;
    fs::write(&path, json)?;
    Ok(path)
}

/// Load a detector artifact. Missing file is `Ok(None)`; an unparseable
/// file is an error the caller degrades on.
pub fn read_detections(task_dir: &Path) -> Result<Option<Vec<DetectionRecord>>, SweepError> {
    let path = task_dir.join(DETECTIONS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Load an actor's action log. Missing file is `Ok(None)`. Individual
/// malformed lines are dropped; a log that parses to nothing but had
/// content is reported as an error so the task degrades visibly.
pub fn read_actions(task_dir: &Path) -> Result<Option<Vec<ActionRecord>>, SweepError> {
    let path = task_dir.join(ACTIONS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();

    let records: Vec<ActionRecord> = lines
        .iter()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    if records.is_empty() && !lines.is_empty() {
        return Err(SweepError::ArtifactNormalization {
            task: task_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            message: "action log present but no line parsed".to_string(),
        });
    }

    Ok(Some(records))
}

/// Scrub likely secrets before a string is persisted to an artifact.
pub fn redact_secrets(text: &str) -> String {
    let mut sanitized = text.to_string();

    let secret_patterns = [
        (
            r"(?i)(password|passwd|pwd)\s*[=:]\s*\S+",
            "[REDACTED_PASSWORD]",
        ),
        (
            r"(?i)(api[_-]?key|apikey)\s*[=:]\s*\S+",
            "[REDACTED_API_KEY]",
        ),
        (r"(?i)(secret|token)\s*[=:]\s*\S+", "[REDACTED_SECRET]"),
        (r"(?i)(bearer)\s+\S+", "Bearer [REDACTED]"),
    ];

    for (pattern, replacement) in &secret_patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, *replacement).to_string();
        }
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detections_roundtrip_and_missing() {
        let dir = tempdir().unwrap();
        assert!(read_detections(dir.path()).unwrap().is_none());

        let records = vec![DetectionRecord::new("/tmp/a", "temp-file", "a", "stale")];
        write_detections(dir.path(), &records).unwrap();

        let loaded = read_detections(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].item_id, "/tmp/a");
    }

    #[test]
    fn test_corrupt_detections_error_out() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DETECTIONS_FILE), "{not json").unwrap();
        assert!(read_detections(dir.path()).is_err());
    }

    #[test]
    fn test_action_log_appends_lines() {
        let dir = tempdir().unwrap();
        let log = ActionLog::new(dir.path());

        log.append(&ActionRecord::new("/tmp/a", ActionOutcome::Succeeded))
            .unwrap();
        log.append(
            &ActionRecord::new("/tmp/b", ActionOutcome::Failed).with_detail("permission denied"),
        )
        .unwrap();

        let loaded = read_actions(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].outcome, ActionOutcome::Succeeded);
        assert_eq!(loaded[1].detail.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_action_log_redacts_secrets() {
        let dir = tempdir().unwrap();
        let log = ActionLog::new(dir.path());

        log.append(
            &ActionRecord::new("db", ActionOutcome::Succeeded)
                .with_detail("reset password=hunter2 for db"),
        )
        .unwrap();

        let raw = fs::read_to_string(dir.path().join(ACTIONS_FILE)).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(raw.contains("[REDACTED_PASSWORD]"));
    }

    #[test]
    fn test_garbage_action_log_is_an_error_not_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ACTIONS_FILE), "junk line\nmore junk\n").unwrap();
        assert!(read_actions(dir.path()).is_err());
    }

    #[test]
    fn test_redact_bearer_token() {
        let out = redact_secrets("Authorization used Bearer eyJabc.def");
        assert!(!out.contains("eyJabc"));
    }
}
