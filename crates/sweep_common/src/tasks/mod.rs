//! Built-in detect/act task pairs.
//!
//! The engine does not care what these do; they implement the same
//! `Detector`/`Actor` contracts external tasks would. Rule content here is
//! deliberately conservative: scans stay inside configured roots, every
//! mutation takes a backup first and lands in the change ledger.

pub mod disk;
pub mod logs;
pub mod packages;
pub mod temp_files;

use std::fs;
use std::path::{Path, PathBuf};

use crate::artifacts;
use crate::task::TaskContext;

/// Copy a file into the session's backup area before mutating it.
/// Returns the absolute backup path for the ledger's undo instruction.
pub(crate) fn backup_file(ctx: &TaskContext<'_>, source: &Path) -> std::io::Result<PathBuf> {
    let backup_dir = artifacts::task_dir(
        &ctx.paths.session_dir(ctx.session_id),
        ctx.task_name,
    )
    .join("backups");
    fs::create_dir_all(&backup_dir)?;

    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let backup_path = backup_dir.join(format!("{}.{}", file_name, uuid::Uuid::new_v4()));

    fs::copy(source, &backup_path)?;
    Ok(backup_path)
}
