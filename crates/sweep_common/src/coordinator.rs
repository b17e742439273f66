//! Execution coordinator: walks the catalog, one task at a time, and turns
//! every outcome into a recorded result.
//!
//! Tasks run strictly sequentially in catalog order. Actors mutate shared
//! host state, so concurrency here would trade correctness for wall-clock
//! time. A task's failure or timeout never prevents subsequent tasks from
//! running; only initialization failure aborts a run.

use std::time::Instant;

use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::artifacts::{self, ActionLog};
use crate::catalog::{Catalog, TaskDescriptor};
use crate::error::SweepError;
use crate::ledger::ChangeLedger;
use crate::paths::PathSet;
use crate::registry::TaskRegistry;
use crate::session::{Session, SessionStore};
use crate::task::{ActOutcome, TaskContext, TaskResult};

pub struct Coordinator<'a> {
    paths: &'a PathSet,
    registry: &'a TaskRegistry,
}

impl<'a> Coordinator<'a> {
    pub fn new(paths: &'a PathSet, registry: &'a TaskRegistry) -> Self {
        Self { paths, registry }
    }

    /// Execute one full session over the catalog and finalize it.
    ///
    /// Dry run never enters any actor code path: what would be processed is
    /// reported from the detector's findings alone.
    pub async fn run_session(
        &self,
        catalog: &Catalog,
        dry_run: bool,
    ) -> Result<Session, SweepError> {
        let mut session = Session::begin(dry_run);
        let store = SessionStore::new(&self.paths.sessions_dir);
        let session_dir = self.paths.session_dir(&session.session_id);
        let ledger = ChangeLedger::new(&session_dir);

        info!(
            "Session {} starting: {} enabled tasks, dry_run={}",
            session.session_id,
            catalog.enabled().count(),
            dry_run
        );

        for descriptor in catalog.enabled() {
            let result = self
                .run_task(&session.session_id, &session_dir, &ledger, descriptor, dry_run)
                .await;
            store.record_result(&mut session, result);
        }

        store.finalize(&mut session)?;
        Ok(session)
    }

    /// Run one task to a `TaskResult`. Infallible by design: every failure
    /// mode of the task lands in the result, not in a propagated error.
    async fn run_task(
        &self,
        session_id: &str,
        session_dir: &std::path::Path,
        ledger: &ChangeLedger,
        descriptor: &TaskDescriptor,
        dry_run: bool,
    ) -> TaskResult {
        let name = descriptor.name.as_str();
        let task_dir = artifacts::task_dir(session_dir, name);
        let artifact_path = task_dir.to_string_lossy().into_owned();
        let timeout_secs = descriptor.effective_timeout_secs();
        let task_timeout = Duration::from_secs(timeout_secs);
        let started = Instant::now();

        info!("Task '{}' starting (timeout {}s)", name, timeout_secs);

        let actions = ActionLog::new(&task_dir);
        let ctx = TaskContext {
            paths: self.paths,
            session_id,
            task_name: name,
            ledger,
            actions: &actions,
        };

        let Some(detector) = self.registry.detector(&descriptor.detector) else {
            warn!(
                "Task '{}': detector '{}' not registered",
                name, descriptor.detector
            );
            return TaskResult::failed(
                name,
                0,
                elapsed_ms(started),
                dry_run,
                format!("detector not registered: {}", descriptor.detector),
                artifact_path,
            );
        };

        // Detector under its bounded-time call. A timeout abandons the
        // in-flight future and records the task as failed; the session
        // moves on.
        let items = match timeout(task_timeout, detector.detect(&ctx)).await {
            Err(_) => {
                warn!("Task '{}' detector timed out after {}s", name, timeout_secs);
                return TaskResult::failed(
                    name,
                    0,
                    elapsed_ms(started),
                    dry_run,
                    "timeout",
                    artifact_path,
                );
            }
            Ok(Err(e)) => {
                warn!("Task '{}' detector failed: {:#}", name, e);
                return TaskResult::failed(
                    name,
                    0,
                    elapsed_ms(started),
                    dry_run,
                    format!("detector failed: {e:#}"),
                    artifact_path,
                );
            }
            Ok(Ok(items)) => items,
        };

        if let Err(e) = artifacts::write_detections(&task_dir, &items) {
            warn!("Task '{}': detection artifact not written: {}", name, e);
        }

        // Dry run: report findings, skip the actor entirely.
        if dry_run {
            info!("Task '{}' (dry run): {} items detected", name, items.len());
            return TaskResult::completed(
                name,
                items.len(),
                &ActOutcome::default(),
                elapsed_ms(started),
                true,
                artifact_path,
            );
        }

        // Audit-only tasks stop at detection.
        let Some(actor_ref) = &descriptor.actor else {
            info!("Task '{}' (audit): {} items detected", name, items.len());
            return TaskResult::completed(
                name,
                items.len(),
                &ActOutcome::default(),
                elapsed_ms(started),
                false,
                artifact_path,
            );
        };

        let Some(actor) = self.registry.actor(actor_ref) else {
            warn!("Task '{}': actor '{}' not registered", name, actor_ref);
            return TaskResult::failed(
                name,
                items.len(),
                elapsed_ms(started),
                false,
                format!("actor not registered: {actor_ref}"),
                artifact_path,
            );
        };

        match timeout(task_timeout, actor.act(&ctx, &items, false)).await {
            Err(_) => {
                warn!("Task '{}' actor timed out after {}s", name, timeout_secs);
                TaskResult::failed(
                    name,
                    items.len(),
                    elapsed_ms(started),
                    false,
                    "timeout",
                    artifact_path,
                )
            }
            Ok(Err(e)) => {
                warn!("Task '{}' actor failed: {:#}", name, e);
                TaskResult::failed(
                    name,
                    items.len(),
                    elapsed_ms(started),
                    false,
                    format!("actor failed: {e:#}"),
                    artifact_path,
                )
            }
            Ok(Ok(outcome)) => {
                info!(
                    "Task '{}' done: {} detected, {} processed, {} failed",
                    name,
                    items.len(),
                    outcome.processed,
                    outcome.failed
                );
                TaskResult::completed(
                    name,
                    items.len(),
                    &outcome,
                    elapsed_ms(started),
                    false,
                    artifact_path,
                )
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
