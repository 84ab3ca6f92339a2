//! Task claim locks
//!
//! One lock file per claimed task under `locks/`. Acquisition is an
//! `O_CREAT|O_EXCL` create, which is atomic across processes sharing the
//! task directory; no in-process state is kept. A lock older than the
//! staleness threshold is treated as abandoned by a crashed agent and may
//! be reclaimed; takeover is serialized so rival claimants never remove a
//! freshly created lock. Release is idempotent.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::task::TaskId;

/// Lock acquisition/release failures
#[derive(Debug, Error)]
pub enum LockError {
    #[error("task {task} is claimed by {holder} ({age_secs}s ago)")]
    LockHeld {
        task: TaskId,
        holder: String,
        age_secs: u64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Contents of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Claiming agent instance
    pub agent: String,

    /// Host the claim was made from; pid probes are only valid there
    #[serde(default)]
    pub hostname: String,

    /// Pid of the claiming process
    pub pid: u32,

    /// Claim timestamp
    #[serde(rename = "acquired-at")]
    pub acquired_at: DateTime<Utc>,
}

/// Inspection view of an existing lock
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// Parsed record, absent when the file is unreadable or malformed
    pub record: Option<LockRecord>,
    pub age: Duration,
    pub stale: bool,
    /// Whether the holder pid still exists; only probed for claims made
    /// on this host
    pub holder_alive: Option<bool>,
}

impl LockInfo {
    pub fn holder(&self) -> &str {
        self.record.as_ref().map(|r| r.agent.as_str()).unwrap_or("unknown")
    }
}

/// File-based exclusive claims over tasks
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    staleness: Duration,
}

impl LockManager {
    pub fn new(dir: PathBuf, staleness: Duration) -> Self {
        Self { dir, staleness }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, task: &TaskId) -> PathBuf {
        self.dir.join(task.lock_filename())
    }

    /// Acquire the exclusive claim for a task
    ///
    /// Fails with `LockHeld` when an unexpired lock exists. A stale lock is
    /// cleared first and acquisition retried once; losing the takeover or
    /// the retry to a rival instance also yields `LockHeld`.
    pub fn acquire(&self, task: &TaskId, agent: &str) -> Result<(), LockError> {
        debug!(%task, agent, "acquiring lock");
        fs::create_dir_all(&self.dir)?;

        match self.try_create(task, agent) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.inspect(task)? {
                Some(info) if info.stale => {
                    warn!(%task, holder = info.holder(), age_secs = info.age.as_secs(), "reclaiming stale lock");
                    self.clear_stale(task)?;
                    self.retry_create(task, agent)
                }
                Some(info) => {
                    debug!(%task, holder = info.holder(), "lock is live");
                    Err(LockError::LockHeld {
                        task: task.clone(),
                        holder: info.holder().to_string(),
                        age_secs: info.age.as_secs(),
                    })
                }
                // Holder released between our create and read
                None => self.retry_create(task, agent),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Second create attempt after a reclaim or vanished lock; losing this
    /// race to another instance yields `LockHeld`
    fn retry_create(&self, task: &TaskId, agent: &str) -> Result<(), LockError> {
        self.try_create(task, agent).map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                self.lock_held_error(task)
            } else {
                LockError::Io(e)
            }
        })
    }

    fn try_create(&self, task: &TaskId, agent: &str) -> std::io::Result<()> {
        let record = LockRecord {
            agent: agent.to_string(),
            hostname: local_hostname(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let mut file = OpenOptions::new().write(true).create_new(true).open(self.lock_path(task))?;
        let yaml = serde_yaml::to_string(&record).map_err(std::io::Error::other)?;
        file.write_all(yaml.as_bytes())?;
        debug!(%task, agent, "lock acquired");
        Ok(())
    }

    /// Remove a stale lock so acquisition can be retried
    ///
    /// Rival claimants can race the same takeover, so removal happens under
    /// an exclusive `flock` on the stale file, after checking that the path
    /// still resolves to the flocked inode and that the record is still
    /// expired. Losing any of those checks means another claim got there
    /// first and surfaces as `LockHeld`. A crash mid-takeover drops the fd
    /// and with it the flock; nothing is left behind to clean up.
    #[cfg(unix)]
    fn clear_stale(&self, task: &TaskId) -> Result<(), LockError> {
        use std::os::unix::fs::MetadataExt;

        use nix::fcntl::{Flock, FlockArg};

        let path = self.lock_path(task);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            // Another claimant already cleared it
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let guard = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(guard) => guard,
            // A rival takeover is in flight
            Err(_) => return Err(self.lock_held_error(task)),
        };

        let held = guard.metadata()?;
        let current = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        // The path names a different file now: a rival finished its
        // takeover and a fresh claim went down while we waited on the flock
        if (current.dev(), current.ino()) != (held.dev(), held.ino()) {
            return Err(self.lock_held_error(task));
        }

        // Same inode, so this re-reads the file we hold flocked
        match self.inspect(task)? {
            Some(info) if info.stale => {
                self.remove_quiet(task)?;
                Ok(())
            }
            Some(_) => Err(self.lock_held_error(task)),
            None => Ok(()),
        }
    }

    /// Remove a stale lock so acquisition can be retried
    ///
    /// Takeover is serialized through a sidecar created with `create_new`,
    /// and the staleness check is repeated while holding it. Losing the
    /// sidecar race surfaces as `LockHeld`.
    #[cfg(not(unix))]
    fn clear_stale(&self, task: &TaskId) -> Result<(), LockError> {
        let sidecar = self.dir.join(format!("{}.reclaim", task.lock_filename()));
        match OpenOptions::new().write(true).create_new(true).open(&sidecar) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(self.lock_held_error(task)),
            Err(e) => return Err(e.into()),
        }
        let outcome = match self.inspect(task)? {
            Some(info) if info.stale => self.remove_quiet(task).map_err(LockError::from),
            Some(_) => Err(self.lock_held_error(task)),
            None => Ok(()),
        };
        let _ = fs::remove_file(&sidecar);
        outcome
    }

    fn lock_held_error(&self, task: &TaskId) -> LockError {
        match self.inspect(task) {
            Ok(Some(info)) => LockError::LockHeld {
                task: task.clone(),
                holder: info.holder().to_string(),
                age_secs: info.age.as_secs(),
            },
            _ => LockError::LockHeld {
                task: task.clone(),
                holder: "unknown".to_string(),
                age_secs: 0,
            },
        }
    }

    /// Release a claim; releasing an absent lock is a no-op
    pub fn release(&self, task: &TaskId) -> Result<(), LockError> {
        debug!(%task, "releasing lock");
        self.remove_quiet(task)?;
        Ok(())
    }

    fn remove_quiet(&self, task: &TaskId) -> std::io::Result<()> {
        match fs::remove_file(self.lock_path(task)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether an unexpired lock exists for the task
    pub fn is_live(&self, task: &TaskId) -> Result<bool, LockError> {
        Ok(self.inspect(task)?.map(|info| !info.stale).unwrap_or(false))
    }

    /// Read the lock for a task, if any
    ///
    /// A malformed record still counts as a lock; its age falls back to the
    /// file's modified time so staleness recovery keeps working.
    pub fn inspect(&self, task: &TaskId) -> Result<Option<LockInfo>, LockError> {
        let path = self.lock_path(task);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: Option<LockRecord> = match serde_yaml::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(%task, %e, "malformed lock record");
                None
            }
        };

        let age = match &record {
            Some(r) => (Utc::now() - r.acquired_at).to_std().unwrap_or(Duration::ZERO),
            None => file_age(&path).unwrap_or(Duration::ZERO),
        };

        // A pid probe only means something on the host that made the claim
        let local = local_hostname();
        let holder_alive = record
            .as_ref()
            .and_then(|r| (r.hostname == local).then(|| process_exists(r.pid)));

        Ok(Some(LockInfo {
            stale: age > self.staleness,
            record,
            age,
            holder_alive,
        }))
    }
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

fn local_hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    #[cfg(not(unix))]
    {
        "unknown".to_string()
    }
}

/// Check whether a pid refers to a live process
fn process_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Signal 0 probes for existence without delivering anything
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}
