//! Disk pressure audit: report filesystems past the usage threshold.
//! Audit-only; there is deliberately no actor to pair with it.

use async_trait::async_trait;
use sysinfo::Disks;

use crate::task::{DetectionRecord, Detector, TaskContext};

pub struct DiskPressureDetector {
    /// Usage percentage above which a filesystem is reported.
    pub threshold_percent: u8,
}

impl Default for DiskPressureDetector {
    fn default() -> Self {
        Self {
            threshold_percent: 90,
        }
    }
}

/// Build a record when usage crosses the threshold.
pub fn evaluate_disk(
    mount_point: &str,
    total_bytes: u64,
    available_bytes: u64,
    threshold_percent: u8,
) -> Option<DetectionRecord> {
    if total_bytes == 0 {
        return None;
    }
    let used = total_bytes.saturating_sub(available_bytes);
    let used_percent = (used as f64 / total_bytes as f64) * 100.0;

    if used_percent < threshold_percent as f64 {
        return None;
    }

    Some(
        DetectionRecord::new(
            mount_point,
            "filesystem",
            mount_point,
            format!("usage-above-{threshold_percent}pct"),
        )
        .with_metadata("used_percent", format!("{used_percent:.1}"))
        .with_metadata("total_bytes", total_bytes.to_string())
        .with_metadata("available_bytes", available_bytes.to_string()),
    )
}

#[async_trait]
impl Detector for DiskPressureDetector {
    async fn detect(&self, _ctx: &TaskContext<'_>) -> anyhow::Result<Vec<DetectionRecord>> {
        let disks = Disks::new_with_refreshed_list();

        Ok(disks
            .iter()
            .filter_map(|disk| {
                evaluate_disk(
                    &disk.mount_point().to_string_lossy(),
                    disk.total_space(),
                    disk.available_space(),
                    self.threshold_percent,
                )
            })
            .collect())
    }
}
