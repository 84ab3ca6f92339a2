//! Quality gate execution
//!
//! Gates are external build/test/lint/format commands run after a phase's
//! agent invocation. TEST runs build+test, REVIEW runs format+lint, VERIFY
//! runs everything configured. A failing gate fails the phase attempt and
//! its output becomes error context in the next retry prompt.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::GatesConfig;
use crate::phase::{PhaseName, output_tail};

/// How much gate output to carry into retry context
const TAIL_CHARS: usize = 2000;

/// One configurable quality gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Build,
    Test,
    Lint,
    Format,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Test => "test",
            Self::Lint => "lint",
            Self::Format => "format",
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gates a phase runs, in order
pub fn gates_for(phase: PhaseName) -> &'static [Gate] {
    match phase {
        PhaseName::Test => &[Gate::Build, Gate::Test],
        PhaseName::Review => &[Gate::Format, Gate::Lint],
        PhaseName::Verify => &[Gate::Build, Gate::Test, Gate::Lint, Gate::Format],
        _ => &[],
    }
}

/// Result of running one gate command
#[derive(Debug, Clone)]
pub struct GateRun {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl GateRun {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// First gate that failed for a phase
#[derive(Debug, Clone)]
pub struct GateFailure {
    pub gate: Gate,
    pub code: i32,
    pub tail: String,
}

/// Run a single gate command via the shell
pub async fn run_gate(command: &str, dir: &Path, timeout: Duration) -> eyre::Result<GateRun> {
    let start = std::time::Instant::now();

    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new("sh").arg("-c").arg(command).current_dir(dir).output(),
    )
    .await??;

    Ok(GateRun {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run a phase's gates in order, stopping at the first failure
///
/// Unconfigured gates are skipped. A gate that times out or cannot launch
/// counts as failed, never as passed.
pub async fn run_phase_gates(phase: PhaseName, config: &GatesConfig, dir: &Path) -> Option<GateFailure> {
    let timeout = Duration::from_millis(config.timeout_ms);

    for &gate in gates_for(phase) {
        let Some(command) = config.command_for(gate) else {
            debug!(%gate, "gate not configured, skipping");
            continue;
        };

        debug!(%gate, command, "running gate");
        match run_gate(command, dir, timeout).await {
            Ok(run) if run.passed() => {
                info!(%gate, duration_ms = run.duration_ms, "gate passed");
            }
            Ok(run) => {
                info!(%gate, exit_code = run.exit_code, "gate failed");
                let combined = if run.stderr.is_empty() {
                    run.stdout
                } else {
                    format!("{}\n{}", run.stdout, run.stderr)
                };
                return Some(GateFailure {
                    gate,
                    code: run.exit_code,
                    tail: output_tail(&combined, TAIL_CHARS),
                });
            }
            Err(e) => {
                info!(%gate, %e, "gate did not complete");
                return Some(GateFailure {
                    gate,
                    code: -1,
                    tail: format!("gate '{}' did not complete: {}", gate, e),
                });
            }
        }
    }

    None
}
