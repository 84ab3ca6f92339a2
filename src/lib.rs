//! doyaken - phase pipeline orchestrator for AI coding agents
//!
//! doyaken drives markdown task files through a fixed pipeline of phases
//! (expand, triage, plan, implement, test, docs, review, verify), one
//! fresh agent invocation per phase. Progress lives on disk, never in
//! memory: tasks move between lifecycle directories, every phase
//! transition is checkpointed, and claim locks keep concurrent runs off
//! each other's tasks.
//!
//! # Core Concepts
//!
//! - **Fresh context per phase**: every invocation starts a new agent
//!   conversation; continuity comes from the task file and the previous
//!   phase's summary block
//! - **State in files**: queue position, claims, and checkpoints are
//!   plain files under `.doyaken/`, safe across crashes and restarts
//! - **Structured handoff**: each phase ends with a machine-readable
//!   summary the next phase's prompt picks up
//! - **Bounded failure**: retries back off exponentially, rate limits
//!   walk a one-way model downgrade ladder, and aborts leave a work-log
//!   trail in the task file itself
//!
//! # Modules
//!
//! - [`task`] - Task files, IDs, and the lifecycle store
//! - [`lock`] - Claim locks with staleness and pid liveness
//! - [`phase`] - Phase definitions and single-invocation execution
//! - [`retry`] - Retry, backoff, and model fallback policy
//! - [`pipeline`] - State machine walking phases with checkpoints
//! - [`prompts`] - Phase prompt templates and rendering
//! - [`gates`] - Quality gate commands
//! - [`report`] - Progress output
//! - [`config`] - Layered configuration
//! - [`cli`] - Command-line interface

pub mod agent;
pub mod cli;
pub mod config;
pub mod gates;
pub mod lock;
pub mod phase;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod retry;
pub mod task;

// Re-export commonly used types
pub use agent::{AgentInvoker, AgentOutput, CommandInvoker};
pub use config::{Config, find_workspace};
pub use lock::{LockError, LockInfo, LockManager, LockRecord};
pub use phase::{PhaseDef, PhaseError, PhaseExecution, PhaseExecutor, PhaseName, PhaseSummary, SummaryStatus};
pub use pipeline::{
    PipelineRun, PipelineRunner, RunOutcome, RunPlan, RunStore, Session, SessionSummary, TaskRunOutcome,
};
pub use prompts::{PromptContext, PromptLoader};
pub use report::{PipelineEvent, Reporter, Verbosity};
pub use retry::{Decision, FatalKind, ModelLadder, RetryController};
pub use task::{Criterion, StoreError, TaskDescriptor, TaskFile, TaskId, TaskOutcome, TaskStatus, TaskStore};
