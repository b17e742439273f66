//! Session lifecycle and result aggregation.
//!
//! One session is one maintenance run. Results append in arrival order
//! (which equals catalog order; the coordinator is sequential). Finalize
//! stamps the end time and writes the manifest once, followed by a
//! completion marker carrying the manifest digest — a reader must be able
//! to tell a torn or tampered manifest from a finished one, not infer it
//! from file absence.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::SweepError;
use crate::task::TaskResult;

/// Session manifest filename.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Completion marker filename; holds the manifest's SHA-256 hex digest.
pub const MANIFEST_MARKER: &str = "manifest.ok";

/// One maintenance run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub task_results: Vec<TaskResult>,
}

impl Session {
    pub fn begin(dry_run: bool) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            dry_run,
            task_results: Vec::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Compact row for `sweepctl sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub dry_run: bool,
    pub tasks: usize,
    pub failed_tasks: usize,
}

/// Durable store of session manifests under the sessions directory.
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: &Path) -> Self {
        Self {
            sessions_dir: sessions_dir.to_path_buf(),
        }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    /// Append one task result in arrival order.
    ///
    /// Enforces the aggregation invariant: for a real run,
    /// `items_processed + items_failed <= items_detected`. An actor that
    /// over-reports gets clamped here with a warning rather than producing
    /// an impossible summary.
    pub fn record_result(&self, session: &mut Session, mut result: TaskResult) {
        if !result.dry_run {
            if result.items_processed > result.items_detected {
                warn!(
                    "Task '{}' reported {} processed of {} detected; clamping",
                    result.task_name, result.items_processed, result.items_detected
                );
                result.items_processed = result.items_detected;
            }
            let room = result.items_detected - result.items_processed;
            if result.items_failed > room {
                warn!(
                    "Task '{}' reported {} failed with only {} unprocessed; clamping",
                    result.task_name, result.items_failed, room
                );
                result.items_failed = room;
            }
        }

        session.task_results.push(result);
    }

    /// Stamp the end time and persist the manifest. Write-once: a session
    /// that already has a manifest on disk cannot be finalized again.
    pub fn finalize(&self, session: &mut Session) -> Result<(), SweepError> {
        let dir = self.session_dir(&session.session_id);
        fs::create_dir_all(&dir)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            return Err(SweepError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("manifest already written for session {}", session.session_id),
            )));
        }

        session.end_time = Some(Utc::now());

        let json = serde_json::to_string_pretty(&session)?;
        fs::write(&manifest_path, &json)?;

        let digest = Sha256::digest(json.as_bytes());
        fs::write(dir.join(MANIFEST_MARKER), hex::encode(digest))?;

        info!(
            "Session {} finalized: {} tasks, {} failed",
            session.session_id,
            session.task_results.len(),
            session.task_results.iter().filter(|r| !r.success).count()
        );
        Ok(())
    }

    /// Load a finalized manifest, verifying the completion marker. A
    /// missing, torn, or tampered manifest is reported, never silently
    /// returned.
    pub fn load_manifest(&self, session_id: &str) -> Result<Session, SweepError> {
        let dir = self.session_dir(session_id);
        let manifest_path = dir.join(MANIFEST_FILE);
        let marker_path = dir.join(MANIFEST_MARKER);

        if !manifest_path.exists() || !marker_path.exists() {
            return Err(SweepError::SessionNotFound(session_id.to_string()));
        }

        let json = fs::read_to_string(&manifest_path)?;
        let expected = fs::read_to_string(&marker_path)?;
        let actual = hex::encode(Sha256::digest(json.as_bytes()));

        if expected.trim() != actual {
            warn!("Manifest digest mismatch for session {}", session_id);
            return Err(SweepError::SessionNotFound(session_id.to_string()));
        }

        Ok(serde_json::from_str(&json)?)
    }

    /// Summaries of all complete sessions, newest first. Incomplete session
    /// directories (no valid marker) are skipped.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, SweepError> {
        let mut summaries = Vec::new();

        if !self.sessions_dir.exists() {
            return Ok(summaries);
        }

        for entry in fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.load_manifest(&id) {
                Ok(session) => summaries.push(SessionSummary {
                    session_id: session.session_id,
                    start_time: session.start_time,
                    dry_run: session.dry_run,
                    tasks: session.task_results.len(),
                    failed_tasks: session.task_results.iter().filter(|r| !r.success).count(),
                }),
                Err(_) => warn!("Skipping incomplete session directory '{}'", id),
            }
        }

        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(summaries)
    }
}
