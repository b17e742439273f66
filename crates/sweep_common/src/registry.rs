//! Task registry: resolves catalog references to detector/actor
//! implementations.
//!
//! The catalog holds names; the registry holds trait objects. An
//! unresolvable reference is reported by the coordinator as a failed task,
//! never a crash.

use std::collections::HashMap;
use std::sync::Arc;

use crate::task::{Actor, Detector};
use crate::tasks;

#[derive(Default)]
pub struct TaskRegistry {
    detectors: HashMap<String, Arc<dyn Detector>>,
    actors: HashMap<String, Arc<dyn Actor>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in tasks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_detector(
            "stale_temp_files",
            Arc::new(tasks::temp_files::StaleTempFileDetector::default()),
        );
        registry.register_actor(
            "stale_temp_files_clean",
            Arc::new(tasks::temp_files::StaleTempFileCleaner),
        );

        registry.register_detector(
            "oversized_logs",
            Arc::new(tasks::logs::OversizedLogDetector::default()),
        );
        registry.register_actor(
            "oversized_logs_truncate",
            Arc::new(tasks::logs::OversizedLogTruncator),
        );

        registry.register_detector(
            "orphan_packages",
            Arc::new(tasks::packages::OrphanPackageDetector),
        );
        registry.register_actor(
            "orphan_packages_remove",
            Arc::new(tasks::packages::OrphanPackageRemover),
        );

        registry.register_detector(
            "disk_pressure",
            Arc::new(tasks::disk::DiskPressureDetector::default()),
        );

        registry
    }

    pub fn register_detector(&mut self, name: impl Into<String>, detector: Arc<dyn Detector>) {
        self.detectors.insert(name.into(), detector);
    }

    pub fn register_actor(&mut self, name: impl Into<String>, actor: Arc<dyn Actor>) {
        self.actors.insert(name.into(), actor);
    }

    pub fn detector(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(name).cloned()
    }

    pub fn actor(&self, name: &str) -> Option<Arc<dyn Actor>> {
        self.actors.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_builtins_cover_default_catalog() {
        let registry = TaskRegistry::with_builtins();

        for task in Catalog::default_catalog().tasks {
            assert!(
                registry.detector(&task.detector).is_some(),
                "missing detector {}",
                task.detector
            );
            if let Some(actor) = &task.actor {
                assert!(registry.actor(actor).is_some(), "missing actor {}", actor);
            }
        }
    }

    #[test]
    fn test_unknown_refs_resolve_to_none() {
        let registry = TaskRegistry::with_builtins();
        assert!(registry.detector("no_such_detector").is_none());
        assert!(registry.actor("no_such_actor").is_none());
    }
}
