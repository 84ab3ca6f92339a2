//! Pipeline checkpoints
//!
//! One JSON record per in-flight task under `.doyaken/runs/`, rewritten
//! atomically after every phase transition. A crash leaves the record
//! behind; the next run resumes at the first phase that never succeeded.
//! The record also pins the model so a downgrade stays sticky across a
//! resume.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::phase::PhaseName;
use crate::task::{TaskId, atomic_write};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io: {0}")]
    Io(#[from] io::Error),
    #[error("checkpoint encoding: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Where a phase stands within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    /// Cancelled mid-flight; resumes here
    Aborted,
}

impl PhaseStatus {
    /// True when a resume should move past this phase
    pub fn is_passed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PhaseRecord {
    pub phase: PhaseName,
    pub status: PhaseStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Summary notes from the agent, fed into the next phase's prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PhaseRecord {
    fn pending(phase: PhaseName) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            attempts: 0,
            error: None,
            duration_ms: None,
            notes: None,
        }
    }
}

/// Final state of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Aborted,
}

/// Durable record of one task's trip through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineRun {
    pub task_id: TaskId,
    pub agent: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phases: Vec<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

impl PipelineRun {
    pub fn new(
        task_id: TaskId,
        agent: impl Into<String>,
        model: impl Into<String>,
        phases: impl IntoIterator<Item = PhaseName>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            agent: agent.into(),
            model: model.into(),
            started_at: now,
            updated_at: now,
            phases: phases.into_iter().map(PhaseRecord::pending).collect(),
            outcome: None,
        }
    }

    /// Index of the first phase a resume must (re)run, `None` when every
    /// phase has passed
    pub fn resume_index(&self) -> Option<usize> {
        self.phases.iter().position(|r| !r.status.is_passed())
    }

    pub fn record(&self, phase: PhaseName) -> Option<&PhaseRecord> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    fn record_mut(&mut self, phase: PhaseName) -> Option<&mut PhaseRecord> {
        self.updated_at = Utc::now();
        self.phases.iter_mut().find(|r| r.phase == phase)
    }

    pub fn begin(&mut self, phase: PhaseName, attempt: u32) {
        if let Some(record) = self.record_mut(phase) {
            record.status = PhaseStatus::Running;
            record.attempts = attempt;
        }
    }

    pub fn succeed(&mut self, phase: PhaseName, attempts: u32, duration_ms: u64, notes: Option<String>) {
        if let Some(record) = self.record_mut(phase) {
            record.status = PhaseStatus::Succeeded;
            record.attempts = attempts;
            record.error = None;
            record.duration_ms = Some(duration_ms);
            record.notes = notes;
        }
    }

    /// Notes of the last phase that passed before `index`
    pub fn notes_before(&self, index: usize) -> Option<&str> {
        self.phases[..index]
            .iter()
            .rev()
            .find_map(|r| r.notes.as_deref())
    }

    pub fn fail(&mut self, phase: PhaseName, attempts: u32, error: impl Into<String>) {
        if let Some(record) = self.record_mut(phase) {
            record.status = PhaseStatus::Failed;
            record.attempts = attempts;
            record.error = Some(error.into());
        }
    }

    pub fn skip(&mut self, phase: PhaseName) {
        if let Some(record) = self.record_mut(phase) {
            record.status = PhaseStatus::Skipped;
        }
    }

    pub fn abort(&mut self, phase: PhaseName) {
        if let Some(record) = self.record_mut(phase) {
            record.status = PhaseStatus::Aborted;
        }
    }

    /// Pin a downgraded model for the rest of the run
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.updated_at = Utc::now();
    }
}

/// Reads and writes run records under `.doyaken/runs/`
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            dir: workspace.as_ref().join(".doyaken").join("runs"),
        }
    }

    fn path_for(&self, id: &TaskId) -> PathBuf {
        self.dir.join(id.run_filename())
    }

    /// Load the checkpoint for a task, if one exists
    ///
    /// A record that no longer parses is treated as absent; the run starts
    /// over rather than refusing to run.
    pub fn load(&self, id: &TaskId) -> Result<Option<PipelineRun>, CheckpointError> {
        let path = self.path_for(id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(run) => Ok(Some(run)),
            Err(e) => {
                warn!(task = %id, error = %e, "discarding unreadable checkpoint");
                Ok(None)
            }
        }
    }

    /// Persist the record atomically
    pub fn save(&self, run: &PipelineRun) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_string_pretty(run)?;
        atomic_write(&self.path_for(&run.task_id), &body)?;
        debug!(task = %run.task_id, "checkpoint written");
        Ok(())
    }

    /// Remove the record; absent is fine
    pub fn delete(&self, id: &TaskId) -> Result<(), CheckpointError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
