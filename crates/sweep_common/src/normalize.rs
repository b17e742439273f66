//! Log normalization pipeline.
//!
//! A second pass, run after the session is finalized: reads the raw
//! detection artifacts and action logs the run produced, validates them,
//! and reshapes everything into the one canonical schema the report
//! renderer consumes. Detector- and actor-specific raw formats never leak
//! past this module.
//!
//! Per-task failures degrade that task's report; they never abort the
//! others. The pipeline always returns exactly one report per task in the
//! session manifest.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifacts::{self, ActionOutcome};
use crate::error::SweepError;
use crate::paths::PathSet;
use crate::session::SessionStore;
use crate::task::{DetectionRecord, TaskResult};

/// Default freshness window for cached normalized reports.
pub const DEFAULT_REPORT_TTL_MINUTES: i64 = 30;

/// One action in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAction {
    pub target: String,
    pub outcome: ActionOutcome,
    pub timestamp_ms: i64,
}

/// Canonical per-task report. The only shape downstream consumers see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedModuleReport {
    pub task_name: String,
    pub summary: TaskResult,
    pub detections: Vec<DetectionRecord>,
    pub actions: Vec<NormalizedAction>,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

impl NormalizedModuleReport {
    fn degraded(summary: &TaskResult, reason: impl Into<String>) -> Self {
        Self {
            task_name: summary.task_name.clone(),
            summary: summary.clone(),
            detections: Vec::new(),
            actions: Vec::new(),
            degraded: true,
            degraded_reason: Some(reason.into()),
        }
    }
}

/// Cache envelope: normalized output plus its creation time for the TTL
/// freshness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedReport {
    created_at: DateTime<Utc>,
    report: NormalizedModuleReport,
}

/// Normalization pipeline for finalized sessions.
pub struct NormalizePipeline<'a> {
    paths: &'a PathSet,
    ttl: Duration,
}

impl<'a> NormalizePipeline<'a> {
    pub fn new(paths: &'a PathSet) -> Self {
        Self {
            paths,
            ttl: Duration::minutes(DEFAULT_REPORT_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Normalize every task of a finalized session.
    ///
    /// Returns one report per manifest task, in manifest order, however
    /// many underlying artifacts are missing or malformed.
    pub fn normalize_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<NormalizedModuleReport>, SweepError> {
        let store = SessionStore::new(&self.paths.sessions_dir);
        let session = store.load_manifest(session_id)?;
        let session_dir = self.paths.session_dir(session_id);

        let reports = session
            .task_results
            .iter()
            .map(|summary| self.normalize_task(session_id, &session_dir, summary))
            .collect();

        Ok(reports)
    }

    /// Normalize one task: cache hit, or load + validate + reshape + cache.
    /// Never errors; every failure mode becomes a degraded report.
    fn normalize_task(
        &self,
        session_id: &str,
        session_dir: &Path,
        summary: &TaskResult,
    ) -> NormalizedModuleReport {
        if let Some(cached) = self.cache_lookup(session_id, &summary.task_name) {
            debug!("Cache hit for ({}, {})", session_id, summary.task_name);
            return cached;
        }

        let report = match self.build_report(session_dir, summary) {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    "Normalization degraded for task '{}': {}",
                    summary.task_name, e
                );
                NormalizedModuleReport::degraded(summary, e.to_string())
            }
        };

        if let Err(e) = self.cache_store(session_id, &report) {
            warn!("Failed to cache report for '{}': {}", summary.task_name, e);
        }

        report
    }

    fn build_report(
        &self,
        session_dir: &Path,
        summary: &TaskResult,
    ) -> Result<NormalizedModuleReport, SweepError> {
        let task_dir = artifacts::task_dir(session_dir, &summary.task_name);

        let detections = artifacts::read_detections(&task_dir)
            .map_err(|e| SweepError::ArtifactNormalization {
                task: summary.task_name.clone(),
                message: format!("detections unreadable: {e}"),
            })?
            .ok_or_else(|| SweepError::ArtifactNormalization {
                task: summary.task_name.clone(),
                message: "detector artifact missing".to_string(),
            })?;

        validate_detections(&summary.task_name, &detections)?;

        let actions = artifacts::read_actions(&task_dir)
            .map_err(|e| SweepError::ArtifactNormalization {
                task: summary.task_name.clone(),
                message: format!("action log unreadable: {e}"),
            })?
            .unwrap_or_default()
            .into_iter()
            .map(|a| NormalizedAction {
                target: a.target,
                outcome: a.outcome,
                timestamp_ms: a.timestamp.timestamp_millis(),
            })
            .collect();

        Ok(NormalizedModuleReport {
            task_name: summary.task_name.clone(),
            summary: summary.clone(),
            detections,
            actions,
            degraded: false,
            degraded_reason: None,
        })
    }

    fn cache_path(&self, session_id: &str, task_name: &str) -> PathBuf {
        self.paths
            .cache_dir
            .join(session_id)
            .join(format!("{task_name}.json"))
    }

    /// A fresh cache entry short-circuits the raw artifact pass. Stale or
    /// unreadable entries count as misses.
    fn cache_lookup(&self, session_id: &str, task_name: &str) -> Option<NormalizedModuleReport> {
        let path = self.cache_path(session_id, task_name);
        let content = fs::read_to_string(&path).ok()?;
        let cached: CachedReport = serde_json::from_str(&content).ok()?;

        if Utc::now() - cached.created_at > self.ttl {
            debug!("Cache entry expired for ({}, {})", session_id, task_name);
            return None;
        }

        Some(cached.report)
    }

    fn cache_store(
        &self,
        session_id: &str,
        report: &NormalizedModuleReport,
    ) -> Result<(), SweepError> {
        let path = self.cache_path(session_id, &report.task_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cached = CachedReport {
            created_at: Utc::now(),
            report: report.clone(),
        };
        fs::write(&path, serde_json::to_string_pretty(&cached)?)?;
        Ok(())
    }
}

/// Required-field validation for raw detection records.
fn validate_detections(task: &str, records: &[DetectionRecord]) -> Result<(), SweepError> {
    for (i, rec) in records.iter().enumerate() {
        if rec.item_id.is_empty() || rec.category.is_empty() {
            return Err(SweepError::ArtifactNormalization {
                task: task.to_string(),
                message: format!("detection {} missing required fields", i),
            });
        }
    }
    Ok(())
}
