//! Change ledger: append-only record of reversible operations, with
//! best-effort reverse-order undo.
//!
//! The undo side of an entry is a structured instruction, never a command
//! string. The ledger file sits on disk between the run and a later
//! `undo`, so everything read back is treated as untrusted: the operation
//! kind is gated by an allow-list and parameters are validated before
//! anything executes. A line that fails the gate is counted as a failed
//! undo, not executed.
//!
//! v0.3.1: undo outcomes moved to their own journal so the ledger file
//! itself stays append-only.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SweepError;

/// Ledger filename within a session directory.
pub const LEDGER_FILE: &str = "ledger.jsonl";

/// Undo outcome filename within a session directory.
pub const UNDO_FILE: &str = "undo.jsonl";

/// The only operation kinds `undo_all` will ever execute.
pub const ALLOWED_UNDO_OPS: &[&str] = &[
    "restore_file",
    "remove_file",
    "install_packages",
    "remove_packages",
    "set_service_state",
];

/// Service transition an undo may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Enable,
    Disable,
}

/// Structured undo command: operation kind + target + parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UndoInstruction {
    /// Copy a backup over the (modified or deleted) original.
    RestoreFile {
        path: PathBuf,
        backup_path: PathBuf,
    },

    /// Delete a file the actor created.
    RemoveFile { path: PathBuf },

    /// Reinstall packages the actor removed.
    InstallPackages { packages: Vec<String> },

    /// Remove packages the actor installed.
    RemovePackages { packages: Vec<String> },

    /// Put a service back into its previous state.
    SetServiceState {
        service: String,
        action: ServiceAction,
    },
}

impl UndoInstruction {
    pub fn kind(&self) -> &'static str {
        match self {
            UndoInstruction::RestoreFile { .. } => "restore_file",
            UndoInstruction::RemoveFile { .. } => "remove_file",
            UndoInstruction::InstallPackages { .. } => "install_packages",
            UndoInstruction::RemovePackages { .. } => "remove_packages",
            UndoInstruction::SetServiceState { .. } => "set_service_state",
        }
    }

    /// Parameter validation for instructions read back from disk.
    ///
    /// Package and service names must not be able to smuggle shell
    /// metacharacters or option injection into the executor.
    fn validate(&self) -> Result<(), SweepError> {
        match self {
            UndoInstruction::RestoreFile { path, backup_path } => {
                validate_path(path)?;
                validate_path(backup_path)
            }
            UndoInstruction::RemoveFile { path } => validate_path(path),
            UndoInstruction::InstallPackages { packages }
            | UndoInstruction::RemovePackages { packages } => {
                if packages.is_empty() {
                    return Err(SweepError::UnsafeUndoRejected(
                        "empty package list".to_string(),
                    ));
                }
                packages.iter().try_for_each(|p| validate_name(p))
            }
            UndoInstruction::SetServiceState { service, .. } => validate_name(service),
        }
    }
}

fn validate_path(path: &Path) -> Result<(), SweepError> {
    if !path.is_absolute() {
        return Err(SweepError::UnsafeUndoRejected(format!(
            "relative path in undo instruction: {}",
            path.display()
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), SweepError> {
    let ok = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | '@'));
    if ok {
        Ok(())
    } else {
        Err(SweepError::UnsafeUndoRejected(format!(
            "unsafe name in undo instruction: {name:?}"
        )))
    }
}

/// One reversible operation performed by an actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub change_id: String,
    pub task_name: String,
    pub target: String,
    pub previous_state: String,
    pub new_state: String,
    pub undo: UndoInstruction,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEntry {
    pub fn new(
        task_name: impl Into<String>,
        target: impl Into<String>,
        previous_state: impl Into<String>,
        new_state: impl Into<String>,
        undo: UndoInstruction,
    ) -> Self {
        Self {
            change_id: uuid::Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            target: target.into(),
            previous_state: previous_state.into(),
            new_state: new_state.into(),
            undo,
            timestamp: Utc::now(),
        }
    }
}

/// Terminal states of an entry. `Recorded` is the implicit initial state of
/// every ledger line without an undo outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoState {
    Undone,
    UndoFailed,
}

/// One line of `undo.jsonl`, joined against the ledger by change id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UndoOutcome {
    change_id: String,
    state: UndoState,
    reason: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Result of an `undo_all` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Executes the package/service side of undo instructions.
///
/// Kept behind a trait so tests record instead of mutate. The system
/// implementation builds a fixed argv per operation; nothing from the
/// ledger is ever passed to a shell.
pub trait UndoExecutor {
    fn install_packages(&self, packages: &[String]) -> anyhow::Result<()>;
    fn remove_packages(&self, packages: &[String]) -> anyhow::Result<()>;
    fn set_service_state(&self, service: &str, action: ServiceAction) -> anyhow::Result<()>;
}

/// Default executor shelling out to the host package manager / systemctl.
pub struct SystemUndoExecutor;

impl SystemUndoExecutor {
    fn run(program: &str, args: &[&str]) -> anyhow::Result<()> {
        let output = std::process::Command::new(program).args(args).output()?;
        if output.status.success() {
            Ok(())
        } else {
            anyhow::bail!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
        }
    }
}

impl UndoExecutor for SystemUndoExecutor {
    fn install_packages(&self, packages: &[String]) -> anyhow::Result<()> {
        let mut args = vec!["-S", "--noconfirm", "--needed"];
        args.extend(packages.iter().map(String::as_str));
        Self::run("pacman", &args)
    }

    fn remove_packages(&self, packages: &[String]) -> anyhow::Result<()> {
        let mut args = vec!["-Rns", "--noconfirm"];
        args.extend(packages.iter().map(String::as_str));
        Self::run("pacman", &args)
    }

    fn set_service_state(&self, service: &str, action: ServiceAction) -> anyhow::Result<()> {
        let verb = match action {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
        };
        Self::run("systemctl", &[verb, service])
    }
}

/// A parsed ledger line, or a placeholder for one that no longer parses.
enum LedgerLine {
    Entry(ChangeEntry),
    Malformed { line_no: usize },
}

/// Append-only change ledger for one session.
pub struct ChangeLedger {
    session_dir: PathBuf,
}

impl ChangeLedger {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            session_dir: session_dir.to_path_buf(),
        }
    }

    fn ledger_path(&self) -> PathBuf {
        self.session_dir.join(LEDGER_FILE)
    }

    fn undo_path(&self) -> PathBuf {
        self.session_dir.join(UNDO_FILE)
    }

    /// Append one entry. Entries are never removed or edited during a run.
    pub fn append(&self, entry: &ChangeEntry) -> Result<(), SweepError> {
        fs::create_dir_all(&self.session_dir)?;
        let json = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.ledger_path())?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load parsed entries in append order. Malformed lines are preserved
    /// as placeholders so `undo_all` can count them.
    fn load_lines(&self) -> Result<Vec<LedgerLine>, SweepError> {
        let path = self.ledger_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        let lines = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, line)| match parse_entry_gated(line) {
                Ok(entry) => LedgerLine::Entry(entry),
                Err(e) => {
                    warn!("Ledger line {} rejected: {}", i + 1, e);
                    LedgerLine::Malformed { line_no: i + 1 }
                }
            })
            .collect();
        Ok(lines)
    }

    /// Entries in append (chronological) order, for reporting.
    pub fn entries(&self) -> Result<Vec<ChangeEntry>, SweepError> {
        Ok(self
            .load_lines()?
            .into_iter()
            .filter_map(|l| match l {
                LedgerLine::Entry(e) => Some(e),
                LedgerLine::Malformed { .. } => None,
            })
            .collect())
    }

    /// Number of entries appended so far (parsed lines only).
    pub fn len(&self) -> Result<usize, SweepError> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, SweepError> {
        Ok(self.len()? == 0)
    }

    fn load_undo_outcomes(&self) -> Result<HashMap<String, UndoState>, SweepError> {
        let path = self.undo_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str::<UndoOutcome>(line).ok())
            .map(|o| (o.change_id, o.state))
            .collect())
    }

    fn record_outcome(
        &self,
        change_id: &str,
        state: UndoState,
        reason: Option<String>,
    ) -> Result<(), SweepError> {
        let outcome = UndoOutcome {
            change_id: change_id.to_string(),
            state,
            reason,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&outcome)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.undo_path())?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Undo every still-recorded entry, most recent first, best effort.
    ///
    /// One failed undo never stops the rest of the batch. Entries already
    /// in a terminal state are skipped, so a second invocation is a no-op
    /// for them.
    pub fn undo_all(&self, executor: &dyn UndoExecutor) -> Result<UndoSummary, SweepError> {
        let lines = self.load_lines()?;
        let already = self.load_undo_outcomes()?;
        let mut summary = UndoSummary::default();

        for line in lines.iter().rev() {
            let entry = match line {
                LedgerLine::Entry(e) => e,
                LedgerLine::Malformed { line_no } => {
                    warn!("Undo skipping malformed ledger line {}", line_no);
                    summary.failed += 1;
                    continue;
                }
            };

            if already.contains_key(&entry.change_id) {
                continue; // terminal, never undone twice
            }

            match self.undo_one(entry, executor) {
                Ok(()) => {
                    info!("Undid change {} ({})", entry.change_id, entry.target);
                    self.record_outcome(&entry.change_id, UndoState::Undone, None)?;
                    summary.succeeded += 1;
                }
                Err(e) => {
                    warn!("Undo failed for change {}: {}", entry.change_id, e);
                    self.record_outcome(&entry.change_id, UndoState::UndoFailed, Some(e.to_string()))?;
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    fn undo_one(&self, entry: &ChangeEntry, executor: &dyn UndoExecutor) -> anyhow::Result<()> {
        entry.undo.validate()?;

        match &entry.undo {
            UndoInstruction::RestoreFile { path, backup_path } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(backup_path, path)?;
                Ok(())
            }
            UndoInstruction::RemoveFile { path } => {
                fs::remove_file(path)?;
                Ok(())
            }
            UndoInstruction::InstallPackages { packages } => executor.install_packages(packages),
            UndoInstruction::RemovePackages { packages } => executor.remove_packages(packages),
            UndoInstruction::SetServiceState { service, action } => {
                executor.set_service_state(service, *action)
            }
        }
    }
}

/// Parse one ledger line with the allow-list gate applied before the typed
/// deserialization, so an off-list operation kind is rejected even if a
/// future (or tampered) schema would otherwise decode.
fn parse_entry_gated(line: &str) -> Result<ChangeEntry, SweepError> {
    let value: serde_json::Value = serde_json::from_str(line)?;

    let op = value
        .get("undo")
        .and_then(|u| u.get("op"))
        .and_then(|o| o.as_str())
        .ok_or_else(|| SweepError::UnsafeUndoRejected("missing undo.op".to_string()))?;

    if !ALLOWED_UNDO_OPS.contains(&op) {
        return Err(SweepError::UnsafeUndoRejected(format!(
            "operation kind not allow-listed: {op}"
        )));
    }

    Ok(serde_json::from_value(value)?)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records calls instead of touching the system.
    #[derive(Default)]
    pub struct RecordingExecutor {
        pub calls: Mutex<Vec<String>>,
        pub fail_on: Option<String>,
    }

    impl UndoExecutor for RecordingExecutor {
        fn install_packages(&self, packages: &[String]) -> anyhow::Result<()> {
            self.record(format!("install {}", packages.join(",")))
        }

        fn remove_packages(&self, packages: &[String]) -> anyhow::Result<()> {
            self.record(format!("remove {}", packages.join(",")))
        }

        fn set_service_state(&self, service: &str, action: ServiceAction) -> anyhow::Result<()> {
            self.record(format!("service {} {:?}", service, action))
        }
    }

    impl RecordingExecutor {
        fn record(&self, call: String) -> anyhow::Result<()> {
            if let Some(fail) = &self.fail_on {
                if call.contains(fail.as_str()) {
                    anyhow::bail!("injected failure for {call}");
                }
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    fn package_entry(task: &str, pkg: &str) -> ChangeEntry {
        ChangeEntry::new(
            task,
            pkg,
            "installed",
            "removed",
            UndoInstruction::InstallPackages {
                packages: vec![pkg.to_string()],
            },
        )
    }

    #[test]
    fn test_append_and_reload() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());

        ledger.append(&package_entry("pkgs", "vim")).unwrap();
        ledger.append(&package_entry("pkgs", "nano")).unwrap();

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target, "vim");
        assert_eq!(entries[1].target, "nano");
    }

    #[test]
    fn test_undo_runs_in_reverse_order() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());

        for pkg in ["a", "b", "c"] {
            ledger.append(&package_entry("pkgs", pkg)).unwrap();
        }

        let exec = RecordingExecutor::default();
        let summary = ledger.undo_all(&exec).unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);

        let calls = exec.calls.lock().unwrap();
        assert_eq!(*calls, vec!["install c", "install b", "install a"]);
    }

    #[test]
    fn test_undo_never_runs_twice() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());
        ledger.append(&package_entry("pkgs", "vim")).unwrap();

        let exec = RecordingExecutor::default();
        assert_eq!(ledger.undo_all(&exec).unwrap().succeeded, 1);
        let second = ledger.undo_all(&exec).unwrap();

        assert_eq!(second, UndoSummary::default());
        assert_eq!(exec.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_one_failure_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());

        for pkg in ["a", "broken", "c"] {
            ledger.append(&package_entry("pkgs", pkg)).unwrap();
        }

        let exec = RecordingExecutor {
            fail_on: Some("broken".to_string()),
            ..Default::default()
        };
        let summary = ledger.undo_all(&exec).unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_failed_undo_is_terminal() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());
        ledger.append(&package_entry("pkgs", "broken")).unwrap();

        let exec = RecordingExecutor {
            fail_on: Some("broken".to_string()),
            ..Default::default()
        };
        assert_eq!(ledger.undo_all(&exec).unwrap().failed, 1);

        // Retry with a working executor: the entry stays UndoFailed.
        let working = RecordingExecutor::default();
        let second = ledger.undo_all(&working).unwrap();
        assert_eq!(second, UndoSummary::default());
        assert!(working.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_off_list_operation_rejected_not_executed() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());

        // Hand-tampered line with an operation kind outside the allow-list.
        let line = serde_json::json!({
            "change_id": "tampered-1",
            "task_name": "pkgs",
            "target": "x",
            "previous_state": "a",
            "new_state": "b",
            "undo": {"op": "run_shell", "command": "rm -rf /"},
            "timestamp": Utc::now(),
        });
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join(LEDGER_FILE), format!("{line}\n")).unwrap();

        let exec = RecordingExecutor::default();
        let summary = ledger.undo_all(&exec).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 0);
        assert!(exec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsafe_package_name_rejected() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());

        let entry = ChangeEntry::new(
            "pkgs",
            "evil",
            "a",
            "b",
            UndoInstruction::InstallPackages {
                packages: vec!["vim; rm -rf /".to_string()],
            },
        );
        ledger.append(&entry).unwrap();

        let exec = RecordingExecutor::default();
        let summary = ledger.undo_all(&exec).unwrap();

        assert_eq!(summary.failed, 1);
        assert!(exec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_option_injection_rejected() {
        assert!(validate_name("--root=/").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("linux-firmware").is_ok());
        assert!(validate_name("gtk+3.0").is_ok());
    }

    #[test]
    fn test_restore_file_undo() {
        let dir = tempdir().unwrap();
        let session = dir.path().join("session");
        let ledger = ChangeLedger::new(&session);

        let target = dir.path().join("config.conf");
        let backup = dir.path().join("config.conf.bak");
        fs::write(&target, "new contents").unwrap();
        fs::write(&backup, "old contents").unwrap();

        ledger
            .append(&ChangeEntry::new(
                "cfg",
                target.to_string_lossy(),
                "old contents",
                "new contents",
                UndoInstruction::RestoreFile {
                    path: target.clone(),
                    backup_path: backup,
                },
            ))
            .unwrap();

        let summary = ledger.undo_all(&RecordingExecutor::default()).unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(fs::read_to_string(&target).unwrap(), "old contents");
    }

    #[test]
    fn test_remove_file_undo() {
        let dir = tempdir().unwrap();
        let session = dir.path().join("session");
        let ledger = ChangeLedger::new(&session);

        let created = dir.path().join("dropped.txt");
        fs::write(&created, "x").unwrap();

        ledger
            .append(&ChangeEntry::new(
                "files",
                created.to_string_lossy(),
                "absent",
                "present",
                UndoInstruction::RemoveFile {
                    path: created.clone(),
                },
            ))
            .unwrap();

        assert_eq!(
            ledger
                .undo_all(&RecordingExecutor::default())
                .unwrap()
                .succeeded,
            1
        );
        assert!(!created.exists());
    }

    #[test]
    fn test_relative_path_rejected() {
        let dir = tempdir().unwrap();
        let ledger = ChangeLedger::new(dir.path());

        ledger
            .append(&ChangeEntry::new(
                "files",
                "x",
                "a",
                "b",
                UndoInstruction::RemoveFile {
                    path: PathBuf::from("../../etc/passwd"),
                },
            ))
            .unwrap();

        let summary = ledger.undo_all(&RecordingExecutor::default()).unwrap();
        assert_eq!(summary.failed, 1);
    }
}
