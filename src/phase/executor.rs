//! Single-invocation phase execution
//!
//! Runs exactly one agent invocation for a phase: render happens upstream,
//! retries happen upstream. This layer enforces the phase's wall-clock
//! timeout, classifies failures, and appends every invocation to the
//! durable JSONL log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::{AgentInvoker, AgentOutput};
use crate::task::TaskId;

use super::definition::PhaseDef;
use super::error::{PhaseError, looks_rate_limited, output_tail};
use super::summary::{PhaseSummary, SummaryStatus, parse_summary};

/// How much failure output to keep for errors and retry context
const TAIL_CHARS: usize = 2000;

/// Successful result of one phase attempt
#[derive(Debug)]
pub struct PhaseExecution {
    pub output: AgentOutput,
    pub summary: PhaseSummary,
    pub duration: Duration,
}

/// One line of the invocation log
#[derive(Debug, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Time-ordered id, unique per invocation
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub task: TaskId,
    pub phase: String,
    pub model: String,
    pub attempt: u32,
    #[serde(rename = "duration-ms")]
    pub duration_ms: u64,
    #[serde(rename = "exit-code")]
    pub exit_code: Option<i32>,
    pub outcome: String,
}

/// Runs one agent invocation per call
pub struct PhaseExecutor {
    invoker: Arc<dyn AgentInvoker>,
    log_path: PathBuf,
}

impl PhaseExecutor {
    pub fn new(invoker: Arc<dyn AgentInvoker>, log_path: PathBuf) -> Self {
        Self { invoker, log_path }
    }

    /// Execute one attempt of a phase
    ///
    /// Success requires exit 0 and a well-formed summary block declaring
    /// `status: success`. The timeout covers the whole invocation; an
    /// elapsed timer drops the invoker future, which kills the agent.
    pub async fn execute(
        &self,
        task: &TaskId,
        phase: &PhaseDef,
        prompt: &str,
        model: &str,
        attempt: u32,
    ) -> Result<PhaseExecution, PhaseError> {
        debug!(%task, phase = %phase.name, model, attempt, timeout = ?phase.timeout, "executing phase");
        let started = tokio::time::Instant::now();

        let result = match timeout(phase.timeout, self.invoker.invoke(prompt, model)).await {
            Err(_) => Err(PhaseError::Timeout(phase.timeout)),
            Ok(Err(e)) => Err(PhaseError::Spawn(e)),
            Ok(Ok(output)) => classify(output),
        };
        let duration = started.elapsed();

        let (exit_code, outcome) = match &result {
            Ok(execution) => (execution.output.exit_code, "success".to_string()),
            Err(PhaseError::Timeout(_)) => (None, "timeout".to_string()),
            Err(PhaseError::NonZeroExit { code, .. }) => (Some(*code), "non-zero-exit".to_string()),
            Err(PhaseError::RateLimited { .. }) => (None, "rate-limited".to_string()),
            Err(PhaseError::MalformedOutput(_)) => (Some(0), "malformed-output".to_string()),
            Err(PhaseError::Blocked { .. }) => (Some(0), "blocked".to_string()),
            Err(PhaseError::GateFailed { .. }) => (None, "gate-failed".to_string()),
            Err(PhaseError::Spawn(_)) => (None, "spawn-failed".to_string()),
        };
        self.append_log(InvocationRecord {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            task: task.clone(),
            phase: phase.name.as_str().to_string(),
            model: model.to_string(),
            attempt,
            duration_ms: duration.as_millis() as u64,
            exit_code,
            outcome,
        });

        result.map(|mut execution| {
            execution.duration = duration;
            execution
        })
    }

    /// Append one record to the invocation log
    ///
    /// The log is diagnostics; an unwritable log warns rather than failing
    /// the phase.
    fn append_log(&self, record: InvocationRecord) {
        if let Err(e) = self.try_append_log(&record) {
            warn!(path = %self.log_path.display(), %e, "could not append invocation log");
        }
    }

    fn try_append_log(&self, record: &InvocationRecord) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().append(true).create(true).open(&self.log_path)?;
        let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
        writeln!(file, "{}", line)
    }
}

/// Sort a finished invocation into success or a typed failure
fn classify(output: AgentOutput) -> Result<PhaseExecution, PhaseError> {
    if !output.success() {
        let combined = output.combined();
        let tail = output_tail(&combined, TAIL_CHARS);
        if looks_rate_limited(&combined) {
            return Err(PhaseError::RateLimited { tail });
        }
        return Err(PhaseError::NonZeroExit {
            code: output.exit_code.unwrap_or(-1),
            tail,
        });
    }

    let summary = parse_summary(&output.stdout)?;
    if summary.status == SummaryStatus::Blocked {
        return Err(PhaseError::Blocked {
            notes: summary.notes.unwrap_or_default(),
        });
    }

    Ok(PhaseExecution {
        output,
        summary,
        // Filled in by the caller once the clock stops
        duration: Duration::ZERO,
    })
}
