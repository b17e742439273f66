//! Stale temp file pair: find old files under the temp roots, delete them
//! with a backup so the change is reversible.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::artifacts::{ActionOutcome, ActionRecord};
use crate::ledger::{ChangeEntry, UndoInstruction};
use crate::task::{ActOutcome, Actor, DetectionRecord, Detector, TaskContext};

pub struct StaleTempFileDetector {
    pub roots: Vec<PathBuf>,
    pub max_age_days: u64,
}

impl Default for StaleTempFileDetector {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("/tmp"), PathBuf::from("/var/tmp")],
            max_age_days: 7,
        }
    }
}

impl StaleTempFileDetector {
    pub fn with_roots(roots: Vec<PathBuf>, max_age_days: u64) -> Self {
        Self {
            roots,
            max_age_days,
        }
    }
}

#[async_trait]
impl Detector for StaleTempFileDetector {
    async fn detect(&self, _ctx: &TaskContext<'_>) -> anyhow::Result<Vec<DetectionRecord>> {
        let cutoff = SystemTime::now() - Duration::from_secs(self.max_age_days * 86_400);
        let rule = format!("older-than-{}d", self.max_age_days);
        let mut records = Vec::new();

        for root in &self.roots {
            if !root.exists() {
                debug!("Temp root {} absent, skipping", root.display());
                continue;
            }
            // Unreadable entries are skipped, not fatal; temp trees are
            // full of permission holes for a non-root scan.
            for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                let Ok(modified) = meta.modified() else { continue };
                if modified >= cutoff {
                    continue;
                }

                let path = entry.path().to_string_lossy().into_owned();
                records.push(
                    DetectionRecord::new(
                        path.clone(),
                        "temp-file",
                        entry.file_name().to_string_lossy(),
                        rule.clone(),
                    )
                    .with_metadata("size_bytes", meta.len().to_string()),
                );
            }
        }

        Ok(records)
    }
}

pub struct StaleTempFileCleaner;

#[async_trait]
impl Actor for StaleTempFileCleaner {
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
            match remove_with_backup(ctx, &path) {
                Ok(()) => {
                    outcome.processed += 1;
                    ctx.actions
                        .append(&ActionRecord::new(&item.item_id, ActionOutcome::Succeeded))?;
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
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

fn remove_with_backup(ctx: &TaskContext<'_>, path: &std::path::Path) -> anyhow::Result<()> {
    let backup_path = super::backup_file(ctx, path)?;
    std::fs::remove_file(path)?;

    ctx.ledger.append(&ChangeEntry::new(
        ctx.task_name,
        path.to_string_lossy(),
        "present",
        "deleted",
        UndoInstruction::RestoreFile {
            path: path.to_path_buf(),
            backup_path,
        },
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ActionLog;
    use crate::ledger::ChangeLedger;
    use crate::paths::PathSet;
    use self::filetime_shim::set_old_mtime;
    use tempfile::tempdir;

    /// Backdate a file's mtime without an extra crate.
    mod filetime_shim {
        use std::path::Path;

        pub fn set_old_mtime(path: &Path) {
            // Ten days back; the test detector uses a 7 day cutoff.
            let mtime = std::time::SystemTime::now() - std::time::Duration::from_secs(10 * 86_400);
            let file = std::fs::File::options().write(true).open(path).unwrap();
            file.set_modified(mtime).unwrap();
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: PathSet,
        temp_root: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let paths =
                PathSet::discover(&dir.path().join("data"), &dir.path().join("cache")).unwrap();
            let temp_root = dir.path().join("scratch");
            std::fs::create_dir_all(&temp_root).unwrap();
            Self {
                _dir: dir,
                paths,
                temp_root,
            }
        }
    }

    #[tokio::test]
    async fn test_detects_only_old_files() {
        let fx = Fixture::new();

        let old = fx.temp_root.join("old.dat");
        let fresh = fx.temp_root.join("fresh.dat");
        std::fs::write(&old, "x").unwrap();
        std::fs::write(&fresh, "y").unwrap();
        set_old_mtime(&old);

        let detector = StaleTempFileDetector::with_roots(vec![fx.temp_root.clone()], 7);
        let session_dir = fx.paths.session_dir("s1");
        let ledger = ChangeLedger::new(&session_dir);
        let actions = ActionLog::new(&session_dir);
        let ctx = TaskContext {
            paths: &fx.paths,
            session_id: "s1",
            task_name: "stale-temp-files",
            ledger: &ledger,
            actions: &actions,
        };

        let records = detector.detect(&ctx).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].item_id.ends_with("old.dat"));
        assert_eq!(records[0].category, "temp-file");
    }

    #[tokio::test]
    async fn test_cleaner_backs_up_and_ledgers() {
        let fx = Fixture::new();

        let victim = fx.temp_root.join("victim.dat");
        std::fs::write(&victim, "contents").unwrap();

        let session_dir = fx.paths.session_dir("s1");
        let ledger = ChangeLedger::new(&session_dir);
        let actions = ActionLog::new(&session_dir.join("tasks").join("stale-temp-files"));
        let ctx = TaskContext {
            paths: &fx.paths,
            session_id: "s1",
            task_name: "stale-temp-files",
            ledger: &ledger,
            actions: &actions,
        };

        let items = vec![DetectionRecord::new(
            victim.to_string_lossy(),
            "temp-file",
            "victim.dat",
            "older-than-7d",
        )];

        let outcome = StaleTempFileCleaner.act(&ctx, &items, false).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed, 0);
        assert!(!victim.exists());

        // Ledger has a restore entry pointing at a real backup.
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0].undo {
            UndoInstruction::RestoreFile { path, backup_path } => {
                assert_eq!(*path, victim);
                assert!(backup_path.exists());
            }
            other => panic!("unexpected undo instruction: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let fx = Fixture::new();
        let victim = fx.temp_root.join("victim.dat");
        std::fs::write(&victim, "contents").unwrap();

        let session_dir = fx.paths.session_dir("s1");
        let ledger = ChangeLedger::new(&session_dir);
        let actions = ActionLog::new(&session_dir);
        let ctx = TaskContext {
            paths: &fx.paths,
            session_id: "s1",
            task_name: "stale-temp-files",
            ledger: &ledger,
            actions: &actions,
        };

        let items = vec![DetectionRecord::new(
            victim.to_string_lossy(),
            "temp-file",
            "victim.dat",
            "older-than-7d",
        )];

        let outcome = StaleTempFileCleaner.act(&ctx, &items, true).await.unwrap();
        assert_eq!(outcome.processed, 0);
        assert!(victim.exists());
        assert!(ledger.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_counts_failed_but_continues() {
        let fx = Fixture::new();
        let real = fx.temp_root.join("real.dat");
        std::fs::write(&real, "x").unwrap();

        let session_dir = fx.paths.session_dir("s1");
        let ledger = ChangeLedger::new(&session_dir);
        let actions = ActionLog::new(&session_dir.join("tasks").join("t"));
        let ctx = TaskContext {
            paths: &fx.paths,
            session_id: "s1",
            task_name: "t",
            ledger: &ledger,
            actions: &actions,
        };

        let items = vec![
            DetectionRecord::new(
                fx.temp_root.join("ghost.dat").to_string_lossy(),
                "temp-file",
                "ghost.dat",
                "r",
            ),
            DetectionRecord::new(real.to_string_lossy(), "temp-file", "real.dat", "r"),
        ];

        let outcome = StaleTempFileCleaner.act(&ctx, &items, false).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.processed, 1);
        assert!(!real.exists());
    }
}
