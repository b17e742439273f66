//! Task catalog: the ordered list of detect/act pairs a session executes.
//!
//! Loaded once from TOML. A malformed `[[tasks]]` entry is skipped with a
//! warning; it never fails the whole load. When no catalog file exists the
//! compiled-in default catalog is used.
//!
//! v0.4.0: entries deserialize individually; one bad record used to fail
//! the whole file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SweepError;

/// Catalog filename within the data directory.
pub const CATALOG_FILE: &str = "catalog.toml";

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

/// Static catalog entry. Never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task name; also the artifact directory name
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Registry reference to the detector implementation
    pub detector: String,

    /// Registry reference to the actor; audit-only tasks have none
    #[serde(default)]
    pub actor: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl TaskDescriptor {
    /// Clamp to something sane; a zero timeout would fail every task.
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.clamp(1, 3600)
    }
}

/// Ordered task catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub tasks: Vec<TaskDescriptor>,
}

impl Catalog {
    /// Load from a TOML file, skipping malformed or duplicate entries.
    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Load from the data directory, falling back to the built-in catalog
    /// when no file exists.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let path = data_dir.join(CATALOG_FILE);
        if path.exists() {
            match Self::load(&path) {
                Ok(catalog) => return catalog,
                Err(e) => warn!("Catalog file unreadable ({}), using defaults", e),
            }
        }
        Self::default_catalog()
    }

    /// Parse catalog TOML. Each entry deserializes individually so one bad
    /// record cannot take down the rest.
    pub fn parse(content: &str) -> Self {
        let value: toml::Value = match content.parse() {
            Ok(v) => v,
            Err(e) => {
                warn!("Catalog TOML unparseable, using empty catalog: {}", e);
                return Self { tasks: Vec::new() };
            }
        };

        let entries = value
            .get("tasks")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();

        let mut tasks: Vec<TaskDescriptor> = Vec::new();
        for (i, entry) in entries.into_iter().enumerate() {
            match entry.try_into::<TaskDescriptor>() {
                Ok(desc) => {
                    if desc.name.is_empty() || desc.detector.is_empty() {
                        warn!("Skipping catalog entry {} with empty name/detector", i);
                        continue;
                    }
                    if tasks.iter().any(|t| t.name == desc.name) {
                        warn!("Skipping duplicate catalog entry '{}'", desc.name);
                        continue;
                    }
                    tasks.push(desc);
                }
                Err(e) => {
                    warn!("Skipping malformed catalog entry {}: {}", i, e);
                }
            }
        }

        info!("Catalog loaded: {} tasks", tasks.len());
        Self { tasks }
    }

    /// The compiled-in catalog used when no file is present.
    pub fn default_catalog() -> Self {
        Self {
            tasks: vec![
                TaskDescriptor {
                    name: "stale-temp-files".to_string(),
                    enabled: true,
                    detector: "stale_temp_files".to_string(),
                    actor: Some("stale_temp_files_clean".to_string()),
                    timeout_secs: 120,
                },
                TaskDescriptor {
                    name: "oversized-logs".to_string(),
                    enabled: true,
                    detector: "oversized_logs".to_string(),
                    actor: Some("oversized_logs_truncate".to_string()),
                    timeout_secs: 120,
                },
                TaskDescriptor {
                    name: "orphan-packages".to_string(),
                    enabled: true,
                    detector: "orphan_packages".to_string(),
                    actor: Some("orphan_packages_remove".to_string()),
                    timeout_secs: 300,
                },
                TaskDescriptor {
                    name: "disk-pressure".to_string(),
                    enabled: true,
                    detector: "disk_pressure".to_string(),
                    actor: None,
                    timeout_secs: 30,
                },
            ],
        }
    }

    /// Enabled descriptors in catalog order.
    pub fn enabled(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.iter().filter(|t| t.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_catalog() {
        let catalog = Catalog::parse(
            r#"
[[tasks]]
name = "temp"
detector = "stale_temp_files"
actor = "stale_temp_files_clean"
timeout_secs = 30

[[tasks]]
name = "audit"
detector = "disk_pressure"
"#,
        );

        assert_eq!(catalog.tasks.len(), 2);
        assert_eq!(catalog.tasks[0].name, "temp");
        assert_eq!(catalog.tasks[0].timeout_secs, 30);
        assert!(catalog.tasks[1].actor.is_none());
        assert!(catalog.tasks[1].enabled);
        assert_eq!(catalog.tasks[1].timeout_secs, 60);
    }

    #[test]
    fn test_malformed_entry_skipped_not_fatal() {
        let catalog = Catalog::parse(
            r#"
[[tasks]]
name = "good"
detector = "disk_pressure"

[[tasks]]
name = "bad"
timeout_secs = "not a number"

[[tasks]]
name = "also-good"
detector = "oversized_logs"
"#,
        );

        let names: Vec<&str> = catalog.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["good", "also-good"]);
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let catalog = Catalog::parse(
            r#"
[[tasks]]
name = "dup"
detector = "first"

[[tasks]]
name = "dup"
detector = "second"
"#,
        );

        assert_eq!(catalog.tasks.len(), 1);
        assert_eq!(catalog.tasks[0].detector, "first");
    }

    #[test]
    fn test_disabled_entries_filtered() {
        let catalog = Catalog::parse(
            r#"
[[tasks]]
name = "off"
detector = "disk_pressure"
enabled = false

[[tasks]]
name = "on"
detector = "disk_pressure"
"#,
        );

        let enabled: Vec<&str> = catalog.enabled().map(|t| t.name.as_str()).collect();
        assert_eq!(enabled, vec!["on"]);
    }

    #[test]
    fn test_timeout_clamped() {
        let desc = TaskDescriptor {
            name: "t".into(),
            enabled: true,
            detector: "d".into(),
            actor: None,
            timeout_secs: 0,
        };
        assert_eq!(desc.effective_timeout_secs(), 1);
    }

    #[test]
    fn test_default_catalog_nonempty() {
        let catalog = Catalog::default_catalog();
        assert!(catalog.tasks.len() >= 4);
        assert!(catalog.tasks.iter().any(|t| t.actor.is_none()));
    }
}
