//! Command implementations for sweepctl.

use std::path::PathBuf;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tracing::info;

use sweep_common::catalog::Catalog;
use sweep_common::coordinator::Coordinator;
use sweep_common::ledger::{ChangeLedger, SystemUndoExecutor};
use sweep_common::normalize::NormalizePipeline;
use sweep_common::paths::ensure_initialized;
use sweep_common::registry::TaskRegistry;
use sweep_common::session::SessionStore;
use sweep_common::task::TaskResult;

/// Run the catalog once and print the per-task outcome table.
pub async fn run(dry_run: bool, catalog_path: Option<PathBuf>) -> Result<()> {
    let paths = ensure_initialized().context("storage initialization failed")?;

    let catalog = match catalog_path {
        Some(path) => Catalog::load(&path)
            .with_context(|| format!("failed to load catalog {}", path.display()))?,
        None => Catalog::load_or_default(&paths.data_dir),
    };

    info!("Starting maintenance run (dry_run={})", dry_run);
    let registry = TaskRegistry::with_builtins();
    let coordinator = Coordinator::new(&paths, &registry);
    let session = coordinator.run_session(&catalog, dry_run).await?;

    if dry_run {
        println!("{}", "Dry run - no changes were made".yellow().bold());
    }
    println!();

    for result in &session.task_results {
        print_result_row(result);
    }

    let failed = session.task_results.iter().filter(|r| !r.success).count();
    println!();
    println!(
        "Session {} finished: {} tasks, {} failed",
        session.session_id.bold(),
        session.task_results.len(),
        failed
    );
    println!(
        "{}",
        console::style(format!(
            "View the report with: sweepctl report {}",
            session.session_id
        ))
        .dim()
    );

    Ok(())
}

fn print_result_row(result: &TaskResult) {
    let status = if result.success {
        "ok".green().to_string()
    } else {
        "failed".red().to_string()
    };

    let counts = if result.dry_run {
        format!("{} detected (would process)", result.items_detected)
    } else {
        format!(
            "{} detected, {} processed, {} failed",
            result.items_detected, result.items_processed, result.items_failed
        )
    };

    println!(
        "  {:<24} {:<8} {}  ({} ms){}",
        result.task_name,
        status,
        counts,
        result.duration_ms,
        result
            .error_message
            .as_deref()
            .map(|e| format!("  [{}]", e.red()))
            .unwrap_or_default()
    );
}

/// Regenerate the consolidated report for a finalized session.
pub fn report(session_id: &str, json: bool) -> Result<()> {
    let paths = ensure_initialized().context("storage initialization failed")?;
    let reports = NormalizePipeline::new(&paths)
        .normalize_session(session_id)
        .with_context(|| format!("no report for session {session_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for module in &reports {
        let marker = if module.degraded {
            "degraded".yellow().to_string()
        } else if module.summary.success {
            "ok".green().to_string()
        } else {
            "failed".red().to_string()
        };

        println!("{} [{}]", module.task_name.bold(), marker);
        if let Some(reason) = &module.degraded_reason {
            println!("  {}", console::style(reason).dim());
        }
        println!(
            "  {} detections, {} actions",
            module.detections.len(),
            module.actions.len()
        );
        for det in &module.detections {
            println!("    - {} ({})", det.display_name, det.matched_rule);
        }
    }

    Ok(())
}

/// Best-effort rollback of a session's recorded changes.
pub fn undo(session_id: &str) -> Result<()> {
    let paths = ensure_initialized().context("storage initialization failed")?;

    // Refuse to undo sessions that never finished writing their manifest.
    let store = SessionStore::new(&paths.sessions_dir);
    store
        .load_manifest(session_id)
        .with_context(|| format!("session {session_id} not found or incomplete"))?;

    let ledger = ChangeLedger::new(&paths.session_dir(session_id));
    let total = ledger.len()?;
    if total == 0 {
        println!("Session {session_id} recorded no reversible changes");
        return Ok(());
    }

    println!("Undoing up to {total} recorded changes, most recent first");
    let summary = ledger.undo_all(&SystemUndoExecutor)?;

    println!(
        "Undo finished: {} succeeded, {} failed",
        summary.succeeded.to_string().green(),
        if summary.failed > 0 {
            summary.failed.to_string().red().to_string()
        } else {
            summary.failed.to_string()
        }
    );

    Ok(())
}

/// List finished sessions, newest first.
pub fn sessions() -> Result<()> {
    let paths = ensure_initialized().context("storage initialization failed")?;
    let store = SessionStore::new(&paths.sessions_dir);
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No finished sessions");
        return Ok(());
    }

    for s in sessions {
        let mode = if s.dry_run { " (dry run)" } else { "" };
        println!(
            "{}  {}  {} tasks, {} failed{}",
            s.start_time.format("%Y-%m-%d %H:%M:%S"),
            s.session_id,
            s.tasks,
            s.failed_tasks,
            mode
        );
    }

    Ok(())
}
