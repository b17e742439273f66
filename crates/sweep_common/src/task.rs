//! Task model: detection records, per-task results, and the detector/actor
//! contracts the catalog resolves to.
//!
//! Detectors are read-only: they inspect host state and report findings.
//! Actors mutate host state from a detector's findings and log every
//! reversible change to the session ledger.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifacts::ActionLog;
use crate::ledger::ChangeLedger;
use crate::paths::PathSet;

/// One item found by a detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Stable identifier within the task (e.g. a path or package name)
    pub item_id: String,

    /// Coarse category (e.g. "temp-file", "package")
    pub category: String,

    /// Human-readable name for the report
    pub display_name: String,

    /// Which rule matched this item
    pub matched_rule: String,

    /// Open key-value map for detector-specific details
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DetectionRecord {
    pub fn new(
        item_id: impl Into<String>,
        category: impl Into<String>,
        display_name: impl Into<String>,
        matched_rule: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            category: category.into(),
            display_name: display_name.into(),
            matched_rule: matched_rule.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// What an actor reports back after processing a detector's findings.
#[derive(Debug, Clone, Default)]
pub struct ActOutcome {
    pub processed: usize,
    pub failed: usize,
}

/// Outcome of one task's execution, recorded by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub success: bool,
    pub items_detected: usize,
    pub items_processed: usize,
    pub items_failed: usize,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub error_message: Option<String>,
    pub artifact_path: String,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    /// Successful (or partially successful) execution.
    ///
    /// Invariant: `items_processed + items_failed <= items_detected` for a
    /// real run; a dry run always reports zero processed. Over-reports are
    /// clamped by the aggregator before recording, not here.
    pub fn completed(
        task_name: impl Into<String>,
        detected: usize,
        outcome: &ActOutcome,
        duration_ms: u64,
        dry_run: bool,
        artifact_path: impl Into<String>,
    ) -> Self {
        let (processed, failed) = if dry_run {
            (0, 0)
        } else {
            (outcome.processed, outcome.failed)
        };

        Self {
            task_name: task_name.into(),
            success: true,
            items_detected: detected,
            items_processed: processed,
            items_failed: failed,
            duration_ms,
            dry_run,
            error_message: None,
            artifact_path: artifact_path.into(),
            finished_at: Utc::now(),
        }
    }

    /// Failed execution (detector error, actor error, or timeout).
    pub fn failed(
        task_name: impl Into<String>,
        detected: usize,
        duration_ms: u64,
        dry_run: bool,
        error_message: impl Into<String>,
        artifact_path: impl Into<String>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            success: false,
            items_detected: detected,
            items_processed: 0,
            items_failed: 0,
            duration_ms,
            dry_run,
            error_message: Some(error_message.into()),
            artifact_path: artifact_path.into(),
            finished_at: Utc::now(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error_message.as_deref() == Some("timeout")
    }
}

/// Everything a task sees of its surroundings.
///
/// Single writer discipline: the context (and everything reachable from it)
/// belongs to one task invocation at a time.
pub struct TaskContext<'a> {
    pub paths: &'a PathSet,
    pub session_id: &'a str,
    pub task_name: &'a str,
    pub ledger: &'a ChangeLedger,
    pub actions: &'a ActionLog,
}

/// Read-only inspection of host state.
///
/// Must not mutate anything; must return within the catalog-declared
/// timeout or the run records the task as failed.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, ctx: &TaskContext<'_>) -> anyhow::Result<Vec<DetectionRecord>>;
}

/// Mutation of host state from a detector's findings.
///
/// With `dry_run == true` an actor must perform zero mutating calls and
/// append nothing to the ledger. The coordinator additionally never invokes
/// actors on a dry run, so this flag only matters for direct callers.
#[async_trait]
pub trait Actor: Send + Sync {
    async fn act(
        &self,
        ctx: &TaskContext<'_>,
        items: &[DetectionRecord],
        dry_run: bool,
    ) -> anyhow::Result<ActOutcome>;
}
