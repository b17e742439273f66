//! Oversized log pair: find logs past the size threshold, truncate them
//! after taking a backup.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::artifacts::{ActionOutcome, ActionRecord};
use crate::ledger::{ChangeEntry, UndoInstruction};
use crate::task::{ActOutcome, Actor, DetectionRecord, Detector, TaskContext};

pub struct OversizedLogDetector {
    pub roots: Vec<PathBuf>,
    pub max_bytes: u64,
}

impl Default for OversizedLogDetector {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("/var/log")],
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl OversizedLogDetector {
    pub fn with_roots(roots: Vec<PathBuf>, max_bytes: u64) -> Self {
        Self { roots, max_bytes }
    }
}

#[async_trait]
impl Detector for OversizedLogDetector {
    async fn detect(&self, _ctx: &TaskContext<'_>) -> anyhow::Result<Vec<DetectionRecord>> {
        let mut records = Vec::new();

        for root in &self.roots {
            if !root.exists() {
                debug!("Log root {} absent, skipping", root.display());
                continue;
            }
            for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.path().extension().and_then(|e| e.to_str()) != Some("log") {
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                if meta.len() <= self.max_bytes {
                    continue;
                }

                records.push(
                    DetectionRecord::new(
                        entry.path().to_string_lossy(),
                        "log-file",
                        entry.file_name().to_string_lossy(),
                        format!("larger-than-{}-bytes", self.max_bytes),
                    )
                    .with_metadata("size_bytes", meta.len().to_string()),
                );
            }
        }

        Ok(records)
    }
}

pub struct OversizedLogTruncator;

#[async_trait]
impl Actor for OversizedLogTruncator {
    async fn act(
        &self,
        ctx: &TaskContext<'_>,
        items: &[DetectionRecord],
        dry_run: bool,
    ) -> anyhow::Result<ActOutcome> {
        if dry_run {
            return Ok(ActOutcome::default());
        }

        let mut outcome = ActOutcome::default();

        for item in items {
            let path = PathBuf::from(&item.item_id);
            match truncate_with_backup(ctx, &path) {
                Ok(()) => {
                    outcome.processed += 1;
                    ctx.actions
                        .append(&ActionRecord::new(&item.item_id, ActionOutcome::Succeeded))?;
                }
                Err(e) => {
                    warn!("Failed to truncate {}: {}", path.display(), e);
                    outcome.failed += 1;
                    ctx.actions.append(
                        &ActionRecord::new(&item.item_id, ActionOutcome::Failed)
                            .with_detail(e.to_string()),
                    )?;
                }
            }
        }

        Ok(outcome)
    }
}

fn truncate_with_backup(ctx: &TaskContext<'_>, path: &std::path::Path) -> anyhow::Result<()> {
    let size = fs::metadata(path)?.len();
    let backup_path = super::backup_file(ctx, path)?;

    fs::File::options().write(true).truncate(true).open(path)?;

    ctx.ledger.append(&ChangeEntry::new(
        ctx.task_name,
        path.to_string_lossy(),
        format!("{size} bytes"),
        "0 bytes",
        UndoInstruction::RestoreFile {
            path: path.to_path_buf(),
            backup_path,
        },
    ))?;
    Ok(())
}
