//! Orphan package pair: query the package manager for dependencies nothing
//! requires anymore, remove them with a reinstall entry in the ledger.
//!
//! The probe side never mutates; a host without pacman simply reports
//! nothing rather than failing every run.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::artifacts::{ActionOutcome, ActionRecord};
use crate::ledger::{ChangeEntry, UndoInstruction};
use crate::task::{ActOutcome, Actor, DetectionRecord, Detector, TaskContext};

pub struct OrphanPackageDetector;

/// Parse `pacman -Qtdq` style output: one package name per line.
pub fn parse_orphan_list(stdout: &str) -> Vec<DetectionRecord> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|name| DetectionRecord::new(name, "package", name, "orphaned-dependency"))
        .collect()
}

#[async_trait]
impl Detector for OrphanPackageDetector {
    async fn detect(&self, _ctx: &TaskContext<'_>) -> anyhow::Result<Vec<DetectionRecord>> {
        let output = match Command::new("pacman").args(["-Qtdq"]).output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("pacman not present on this host, no orphans to report");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        // pacman exits 1 with empty output when there are no orphans.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && !stdout.trim().is_empty() {
            anyhow::bail!(
                "pacman -Qtdq failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(parse_orphan_list(&stdout))
    }
}

pub struct OrphanPackageRemover;

#[async_trait]
impl Actor for OrphanPackageRemover {
    async fn act(
        &self,
        ctx: &TaskContext<'_>,
        items: &[DetectionRecord],
        dry_run: bool,
    ) -> anyhow::Result<ActOutcome> {
        if dry_run || items.is_empty() {
            return Ok(ActOutcome::default());
        }

        let packages: Vec<String> = items.iter().map(|i| i.item_id.clone()).collect();

        let mut args = vec!["-Rns".to_string(), "--noconfirm".to_string()];
        args.extend(packages.iter().cloned());

        let output = Command::new("pacman").args(&args).output().await?;
        let mut outcome = ActOutcome::default();

        if output.status.success() {
            // One ledger entry for the batch: reinstall restores them all.
            ctx.ledger.append(&ChangeEntry::new(
                ctx.task_name,
                packages.join(" "),
                "installed",
                "removed",
                UndoInstruction::InstallPackages {
                    packages: packages.clone(),
                },
            ))?;
            for pkg in &packages {
                ctx.actions
                    .append(&ActionRecord::new(pkg, ActionOutcome::Succeeded))?;
            }
            outcome.processed = packages.len();
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("Package removal failed: {}", stderr);
            for pkg in &packages {
                ctx.actions.append(
                    &ActionRecord::new(pkg, ActionOutcome::Failed).with_detail(stderr.clone()),
                )?;
            }
            outcome.failed = packages.len();
        }

        Ok(outcome)
    }
}
