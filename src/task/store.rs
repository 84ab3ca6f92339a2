//! File-backed task store over the todo/doing/done lifecycle directories
//!
//! Tasks live as `<id>.md` under `tasks/<status>/` inside the workspace
//! directory. Claiming pairs a lock acquisition with an atomic rename into
//! `doing`; releasing moves the file to `done` or back to `todo` and deletes
//! the lock. Multiple orchestrator processes may share one workspace, so
//! every mutation goes through the filesystem, never in-process state.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::lock::{LockError, LockManager};

use super::file::TaskFile;
use super::id::TaskId;

/// Lifecycle directory a task lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
}

impl TaskStatus {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
        }
    }

    pub const ALL: [TaskStatus; 3] = [Self::Todo, Self::Doing, Self::Done];
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "doing" => Ok(Self::Doing),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown status: {} (expected todo|doing|done)", other)),
        }
    }
}

/// Final disposition of a released task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failure,
}

/// Location of one task on disk
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub status: TaskStatus,
    pub path: PathBuf,
}

/// Task store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("task {id} not found")]
    NotFound { id: TaskId },

    #[error("task {id} is already done")]
    AlreadyDone { id: TaskId },

    #[error("task {id} is not claimed")]
    NotClaimed { id: TaskId },

    #[error("task {id} has unchecked acceptance criteria: {unchecked:?}")]
    AcceptanceUnmet { id: TaskId, unchecked: Vec<String> },

    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Another instance owns the task; skip it rather than failing the run
    pub fn is_lock_held(&self) -> bool {
        matches!(self, Self::Lock(LockError::LockHeld { .. }))
    }
}

/// Store rooted at a project directory containing `.doyaken`
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks_dir: PathBuf,
    locks: LockManager,
}

impl TaskStore {
    pub fn new(workspace: &Path, staleness: Duration) -> Self {
        let root = workspace.join(".doyaken");
        Self {
            tasks_dir: root.join("tasks"),
            locks: LockManager::new(root.join("locks"), staleness),
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn dir(&self, status: TaskStatus) -> PathBuf {
        self.tasks_dir.join(status.dir_name())
    }

    pub fn task_path(&self, id: &TaskId, status: TaskStatus) -> PathBuf {
        self.dir(status).join(id.filename())
    }

    /// Create the lifecycle directories if absent
    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        for status in TaskStatus::ALL {
            fs::create_dir_all(self.dir(status))?;
        }
        fs::create_dir_all(self.locks.dir())?;
        Ok(())
    }

    /// Tasks in one lifecycle directory, priority then sequence ascending
    pub fn list(&self, status: TaskStatus) -> Result<Vec<TaskDescriptor>, StoreError> {
        let dir = self.dir(status);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match TaskId::parse(stem) {
                Ok(id) => tasks.push(TaskDescriptor {
                    id,
                    status,
                    path: path.clone(),
                }),
                Err(e) => warn!(path = %path.display(), %e, "skipping file with malformed task id"),
            }
        }

        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    /// Locate a task in any lifecycle directory
    pub fn find(&self, id: &TaskId) -> Result<Option<TaskDescriptor>, StoreError> {
        for status in TaskStatus::ALL {
            let path = self.task_path(id, status);
            if path.exists() {
                return Ok(Some(TaskDescriptor {
                    id: id.clone(),
                    status,
                    path,
                }));
            }
        }
        Ok(None)
    }

    /// Read a task's content
    pub fn read(&self, desc: &TaskDescriptor) -> Result<TaskFile, StoreError> {
        let content = fs::read_to_string(&desc.path)?;
        Ok(TaskFile::new(desc.id.clone(), content))
    }

    /// Claim a task for an agent: lock it and move it into `doing`
    ///
    /// A task already in `doing` is a recovery claim (a previous run crashed
    /// or was aborted mid-pipeline): the lock is re-acquired, which only
    /// succeeds when the old one is stale or missing, and no move happens.
    pub fn claim(&self, id: &TaskId, agent: &str) -> Result<TaskDescriptor, StoreError> {
        debug!(%id, agent, "claim");
        let desc = self.find(id)?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;

        match desc.status {
            TaskStatus::Done => Err(StoreError::AlreadyDone { id: id.clone() }),
            TaskStatus::Doing => {
                self.locks.acquire(id, agent)?;
                debug!(%id, "reclaimed task already in doing");
                Ok(desc)
            }
            TaskStatus::Todo => {
                self.locks.acquire(id, agent)?;
                let target = self.task_path(id, TaskStatus::Doing);
                if let Err(e) = fs::rename(&desc.path, &target) {
                    // Claim is all-or-nothing; do not leave an orphaned lock
                    if let Err(release_err) = self.locks.release(id) {
                        warn!(%id, %release_err, "failed to roll back lock after move failure");
                    }
                    return Err(e.into());
                }
                debug!(%id, "claimed task into doing");
                Ok(TaskDescriptor {
                    id: id.clone(),
                    status: TaskStatus::Doing,
                    path: target,
                })
            }
        }
    }

    /// Release a claimed task to its final directory and drop the lock
    ///
    /// Success moves to `done` and requires every acceptance-criteria entry
    /// to be checked; failure moves back to `todo`. Idempotent: releasing a
    /// task that already reached the target directory is a no-op.
    pub fn release(&self, id: &TaskId, outcome: TaskOutcome) -> Result<(), StoreError> {
        debug!(%id, ?outcome, "release");
        let desc = self.find(id)?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;

        let target_status = match outcome {
            TaskOutcome::Success => TaskStatus::Done,
            TaskOutcome::Failure => TaskStatus::Todo,
        };

        match desc.status {
            status if status == target_status => {
                // Already released; make sure no lock lingers
                self.locks.release(id)?;
                Ok(())
            }
            TaskStatus::Doing => {
                if outcome == TaskOutcome::Success {
                    let unchecked = self.read(&desc)?.unchecked_criteria();
                    if !unchecked.is_empty() {
                        return Err(StoreError::AcceptanceUnmet { id: id.clone(), unchecked });
                    }
                }
                fs::rename(&desc.path, self.task_path(id, target_status))?;
                self.locks.release(id)?;
                debug!(%id, target = %target_status, "released");
                Ok(())
            }
            _ => Err(StoreError::NotClaimed { id: id.clone() }),
        }
    }

    /// Drop a task's lock without moving it out of `doing`
    ///
    /// Used when a run stops mid-pipeline on purpose (cancellation): the
    /// task keeps its place in `doing` and a later run's recovery scan
    /// picks it up where the checkpoint left off.
    pub fn unclaim(&self, id: &TaskId) -> Result<(), StoreError> {
        debug!(%id, "unclaim");
        self.locks.release(id)?;
        Ok(())
    }

    /// Tasks stranded in `doing` whose lock is stale or missing
    ///
    /// These are runs interrupted by a crash; they take precedence over new
    /// work so in-flight tasks finish first.
    pub fn scan_recoverable(&self) -> Result<Vec<TaskDescriptor>, StoreError> {
        let mut recoverable = Vec::new();
        for desc in self.list(TaskStatus::Doing)? {
            if !self.locks.is_live(&desc.id)? {
                debug!(id = %desc.id, "recoverable task found in doing");
                recoverable.push(desc);
            }
        }
        Ok(recoverable)
    }

    /// Blockers of a task that are not yet done
    pub fn blockers_pending(&self, task: &TaskFile) -> Result<Vec<TaskId>, StoreError> {
        let mut pending = Vec::new();
        for blocker in task.blocked_by() {
            let done = self.task_path(&blocker, TaskStatus::Done).exists();
            if !done {
                pending.push(blocker);
            }
        }
        Ok(pending)
    }

    /// Append a timestamped entry to a task's Work Log and write it back
    pub fn append_work_log(&self, id: &TaskId, line: &str) -> Result<(), StoreError> {
        let desc = self.find(id)?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
        let mut file = self.read(&desc)?;
        file.append_work_log(line);
        atomic_write(&desc.path, file.content())?;
        Ok(())
    }
}

/// Write a file via a temp sibling and rename, never a partial overwrite
pub(crate) fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path.with_file_name(format!("{name}.tmp")),
        None => return Err(std::io::Error::new(ErrorKind::InvalidInput, "path has no file name")),
    };
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TaskStore {
        let store = TaskStore::new(dir.path(), Duration::from_secs(3600));
        store.ensure_layout().unwrap();
        store
    }

    fn write_task(store: &TaskStore, status: TaskStatus, id: &str, content: &str) -> TaskId {
        let id = TaskId::parse(id).unwrap();
        fs::write(store.task_path(&id, status), content).unwrap();
        id
    }

    fn simple_task(id: &str) -> String {
        format!("# {id}\n\n## Context\nwork\n\n## Acceptance Criteria\n- [x] it works\n\n## Work Log\n")
    }

    #[test]
    fn test_list_orders_by_priority_then_sequence() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        write_task(&store, TaskStatus::Todo, "002-001-later", "# t\n");
        write_task(&store, TaskStatus::Todo, "001-002-second", "# t\n");
        write_task(&store, TaskStatus::Todo, "001-001-first", "# t\n");

        let ids: Vec<String> = store
            .list(TaskStatus::Todo)
            .unwrap()
            .into_iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["001-001-first", "001-002-second", "002-001-later"]);
    }

    #[test]
    fn test_list_skips_non_task_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        write_task(&store, TaskStatus::Todo, "001-001-real", "# t\n");
        fs::write(store.dir(TaskStatus::Todo).join("README.md"), "not a task").unwrap();
        fs::write(store.dir(TaskStatus::Todo).join(".gitkeep"), "").unwrap();

        let tasks = store.list(TaskStatus::Todo).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.to_string(), "001-001-real");
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path(), Duration::from_secs(3600));
        assert!(store.list(TaskStatus::Todo).unwrap().is_empty());
    }

    #[test]
    fn test_claim_moves_to_doing_and_locks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-add-login", &simple_task("003-001-add-login"));

        let desc = store.claim(&id, "a1").unwrap();
        assert_eq!(desc.status, TaskStatus::Doing);
        assert!(desc.path.exists());
        assert!(!store.task_path(&id, TaskStatus::Todo).exists());
        assert!(store.locks().is_live(&id).unwrap());
    }

    #[test]
    fn test_claim_twice_is_lock_held() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-add-login", &simple_task("003-001-add-login"));

        store.claim(&id, "a1").unwrap();
        let err = store.claim(&id, "a2").unwrap_err();
        assert!(err.is_lock_held());
    }

    #[test]
    fn test_claim_missing_task() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = TaskId::parse("001-001-ghost").unwrap();
        assert!(matches!(store.claim(&id, "a1"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_claim_done_task() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Done, "001-001-finished", "# t\n");
        assert!(matches!(store.claim(&id, "a1"), Err(StoreError::AlreadyDone { .. })));
    }

    #[test]
    fn test_claim_recovers_doing_task_without_lock() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Doing, "002-001-stranded", &simple_task("002-001-stranded"));

        let desc = store.claim(&id, "a1").unwrap();
        assert_eq!(desc.status, TaskStatus::Doing);
        assert!(store.locks().is_live(&id).unwrap());
    }

    #[test]
    fn test_claim_doing_task_with_live_lock_is_held() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Doing, "002-001-busy", "# t\n");
        store.locks().acquire(&id, "other").unwrap();

        let err = store.claim(&id, "a1").unwrap_err();
        assert!(err.is_lock_held());
    }

    #[test]
    fn test_release_success_moves_to_done() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-add-login", &simple_task("003-001-add-login"));

        store.claim(&id, "a1").unwrap();
        store.release(&id, TaskOutcome::Success).unwrap();

        assert!(store.task_path(&id, TaskStatus::Done).exists());
        assert!(!store.task_path(&id, TaskStatus::Doing).exists());
        assert!(!store.locks().is_live(&id).unwrap());
    }

    #[test]
    fn test_release_failure_returns_to_todo() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-add-login", &simple_task("003-001-add-login"));

        store.claim(&id, "a1").unwrap();
        store.release(&id, TaskOutcome::Failure).unwrap();

        assert!(store.task_path(&id, TaskStatus::Todo).exists());
        assert!(!store.locks().is_live(&id).unwrap());
    }

    #[test]
    fn test_release_success_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-add-login", &simple_task("003-001-add-login"));

        store.claim(&id, "a1").unwrap();
        store.release(&id, TaskOutcome::Success).unwrap();
        store.release(&id, TaskOutcome::Success).unwrap();

        assert!(store.task_path(&id, TaskStatus::Done).exists());
        assert!(!store.locks().is_live(&id).unwrap());
    }

    #[test]
    fn test_release_success_with_unchecked_criteria() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let content = "# t\n\n## Acceptance Criteria\n- [ ] still open\n";
        let id = write_task(&store, TaskStatus::Todo, "003-001-incomplete", content);

        store.claim(&id, "a1").unwrap();
        let err = store.release(&id, TaskOutcome::Success).unwrap_err();
        match err {
            StoreError::AcceptanceUnmet { unchecked, .. } => {
                assert_eq!(unchecked, vec!["still open"]);
            }
            other => panic!("expected AcceptanceUnmet, got {other:?}"),
        }
        // Task stays claimed in doing so the caller decides what to do next
        assert!(store.task_path(&id, TaskStatus::Doing).exists());
        assert!(store.locks().is_live(&id).unwrap());
    }

    #[test]
    fn test_release_unclaimed_task() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-idle", &simple_task("003-001-idle"));
        assert!(matches!(
            store.release(&id, TaskOutcome::Success),
            Err(StoreError::NotClaimed { .. })
        ));
    }

    #[test]
    fn test_unclaim_leaves_task_in_doing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-paused", &simple_task("003-001-paused"));

        store.claim(&id, "a1").unwrap();
        store.unclaim(&id).unwrap();

        assert!(store.task_path(&id, TaskStatus::Doing).exists());
        assert!(!store.locks().is_live(&id).unwrap());
        // An unclaimed task is exactly what the recovery scan looks for
        assert_eq!(store.scan_recoverable().unwrap().len(), 1);
    }

    #[test]
    fn test_scan_recoverable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stranded = write_task(&store, TaskStatus::Doing, "001-001-stranded", "# t\n");
        let busy = write_task(&store, TaskStatus::Doing, "001-002-busy", "# t\n");
        store.locks().acquire(&busy, "other").unwrap();

        let recoverable = store.scan_recoverable().unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].id, stranded);
    }

    #[test]
    fn test_blockers_pending() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        write_task(&store, TaskStatus::Done, "001-001-ready", "# t\n");
        let content = "# t\n\n- Blocked-by: 001-001-ready, 001-002-missing\n\n## Context\n";
        let id = write_task(&store, TaskStatus::Todo, "002-001-blocked", content);

        let desc = store.find(&id).unwrap().unwrap();
        let task = store.read(&desc).unwrap();
        let pending = store.blockers_pending(&task).unwrap();
        assert_eq!(pending, vec![TaskId::parse("001-002-missing").unwrap()]);
    }

    #[test]
    fn test_append_work_log_persists() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let id = write_task(&store, TaskStatus::Todo, "003-001-add-login", &simple_task("003-001-add-login"));

        store.append_work_log(&id, "- 2026-08-02T11:00:00Z [IMPLEMENT] succeeded").unwrap();

        let desc = store.find(&id).unwrap().unwrap();
        let task = store.read(&desc).unwrap();
        assert!(task.section("Work Log").unwrap().contains("[IMPLEMENT] succeeded"));
    }
}
