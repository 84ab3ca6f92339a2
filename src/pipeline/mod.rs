//! Pipeline state machine
//!
//! A run walks one task through the configured phases, checkpointing after
//! every transition so a crashed or interrupted process resumes where it
//! stopped instead of re-running finished phases.

mod checkpoint;
mod runner;

pub use checkpoint::{CheckpointError, PhaseRecord, PhaseStatus, PipelineRun, RunOutcome, RunStore};
pub use runner::{PipelineRunner, RunPlan, Session, SessionSummary, TaskRunOutcome};
