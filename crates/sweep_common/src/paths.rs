//! Runtime path discovery with a process-wide initialization guard.
//!
//! Every task-loading path calls [`ensure_initialized`] before touching
//! storage. Discovery runs exactly once per process; concurrent callers
//! during startup all observe the same [`PathSet`].
//!
//! v0.2.0: replaced the ad-hoc `create_dir_all` sprinkled through tasks
//! with a single guarded discovery step.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SweepError;

/// Bounded wait for the cross-process init lock.
pub const INIT_LOCK_WAIT_SECS: u64 = 5;

/// Resolved storage locations for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSet {
    /// Root data directory (catalog, sessions)
    pub data_dir: PathBuf,

    /// Per-session artifact trees live under here
    pub sessions_dir: PathBuf,

    /// Derived caches (normalized reports)
    pub cache_dir: PathBuf,
}

impl PathSet {
    /// Discover paths under an explicit root. Used directly by tests and by
    /// the guard below with the host-default root.
    pub fn discover(data_root: &Path, cache_root: &Path) -> Result<Self, SweepError> {
        let set = Self {
            data_dir: data_root.to_path_buf(),
            sessions_dir: data_root.join("sessions"),
            cache_dir: cache_root.join("reports"),
        };
        set.create_dirs()?;
        Ok(set)
    }

    /// Host-default roots: env overrides first, then XDG locations.
    pub fn host_default() -> Result<Self, SweepError> {
        let data_root = std::env::var("SWEEP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("sweep")
            });

        let cache_root = std::env::var("SWEEP_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from(".cache"))
                    .join("sweep")
            });

        Self::discover(&data_root, &cache_root)
    }

    fn create_dirs(&self) -> Result<(), SweepError> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.sessions_dir)?;
        fs::create_dir_all(&self.cache_dir)?;

        // Session artifacts can contain host details; owner-only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            let _ = fs::set_permissions(&self.data_dir, perms.clone());
            let _ = fs::set_permissions(&self.sessions_dir, perms);
        }

        Ok(())
    }

    /// Directory for one session's artifacts.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }
}

static INITIALIZED: OnceLock<PathSet> = OnceLock::new();

/// Cross-process lock held while one process performs discovery.
///
/// `create_new` is atomic on every filesystem we care about; the file is
/// removed on drop, including the timeout and error exits.
#[derive(Debug)]
struct InitLock {
    path: PathBuf,
}

impl InitLock {
    fn acquire(path: PathBuf, wait: Duration) -> Result<Self, SweepError> {
        let deadline = Instant::now() + wait;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(SweepError::InitializationTimeout(wait.as_secs()));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(SweepError::Io(e)),
            }
        }
    }
}

impl Drop for InitLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release init lock {}: {}", self.path.display(), e);
        }
    }
}

/// One-time discovery of runtime paths, safe under concurrent callers.
///
/// Fast path: the process-wide `OnceLock`. On a miss the caller takes the
/// named lock file with a bounded wait, re-checks the flag (another caller
/// may have finished while we waited), then performs discovery and
/// publishes. Lock acquisition failure is fatal for the run: no task can
/// resolve its storage paths without this.
pub fn ensure_initialized() -> Result<PathSet, SweepError> {
    if let Some(paths) = INITIALIZED.get() {
        return Ok(paths.clone());
    }

    let lock_path = std::env::temp_dir().join("sweep-init.lock");
    let lock = InitLock::acquire(lock_path, Duration::from_secs(INIT_LOCK_WAIT_SECS))?;

    // Double-check under the lock.
    if let Some(paths) = INITIALIZED.get() {
        drop(lock);
        return Ok(paths.clone());
    }

    let paths = PathSet::host_default()?;
    debug!("Initialized paths: data={}", paths.data_dir.display());

    let published = INITIALIZED.get_or_init(|| paths.clone());
    drop(lock);
    Ok(published.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_discover_creates_tree() {
        let dir = tempdir().unwrap();
        let paths = PathSet::discover(&dir.path().join("data"), &dir.path().join("cache")).unwrap();

        assert!(paths.sessions_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
        assert!(paths.session_dir("abc").starts_with(&paths.sessions_dir));
    }

    #[test]
    fn test_lock_acquire_and_release() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("init.lock");

        let lock = InitLock::acquire(lock_path.clone(), Duration::from_secs(1)).unwrap();
        assert!(lock_path.exists());
        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_lock_times_out_when_held() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("init.lock");

        let _held = InitLock::acquire(lock_path.clone(), Duration::from_secs(1)).unwrap();
        let err = InitLock::acquire(lock_path, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, SweepError::InitializationTimeout(_)));
    }

    #[test]
    fn test_lock_released_on_timeout_path() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("init.lock");

        {
            let _held = InitLock::acquire(lock_path.clone(), Duration::from_secs(1)).unwrap();
            let _ = InitLock::acquire(lock_path.clone(), Duration::from_millis(100));
        }
        // Holder dropped; the file must be gone and re-acquirable.
        let relock = InitLock::acquire(lock_path.clone(), Duration::from_millis(100));
        assert!(relock.is_ok());
    }

    #[test]
    fn test_concurrent_ensure_initialized_single_pathset() {
        // All callers must observe the same PathSet, and discovery must not
        // race (the OnceLock publishes exactly one value).
        let dir = tempdir().unwrap();
        std::env::set_var("SWEEP_DATA_DIR", dir.path().join("data"));
        std::env::set_var("SWEEP_CACHE_DIR", dir.path().join("cache"));

        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(ensure_initialized))
            .collect();

        let results: Vec<PathSet> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let first = Arc::new(results[0].clone());
        for r in &results {
            assert_eq!(*r, *first);
        }
    }
}
