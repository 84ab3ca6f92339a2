//! Progress reporting
//!
//! Stateless rendering of pipeline events. The runner emits events; this
//! module turns them into lines (or nothing, per verbosity) and prints
//! them. Rendering is a pure sink and never feeds back into control flow.

use colored::Colorize;

use crate::phase::PhaseName;
use crate::task::TaskId;

/// How much to print
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Final outcome only
    Quiet,
    /// One line per phase
    Default,
    /// Adds phase starts, raw agent output, and backoff detail
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Default
        }
    }
}

/// What happened in the pipeline, as far as the user cares
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PipelineStarted {
        task: TaskId,
        resumed_at: Option<PhaseName>,
    },
    PhaseStarted {
        phase: PhaseName,
        attempt: u32,
        model: String,
    },
    PhaseSucceeded {
        phase: PhaseName,
        attempts: u32,
        duration_ms: u64,
    },
    PhaseSkipped {
        phase: PhaseName,
    },
    PhaseRetry {
        phase: PhaseName,
        next_attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },
    ModelFallback {
        from: String,
        to: String,
    },
    /// Raw agent output, shown only at verbose
    AgentOutput {
        phase: PhaseName,
        output: String,
    },
    PipelineDone {
        task: TaskId,
        duration_ms: u64,
    },
    PipelineAborted {
        task: TaskId,
        phase: PhaseName,
        error: String,
    },
    /// Interrupted by the user; the task stays in doing for a later resume
    PipelineCancelled {
        task: TaskId,
        phase: PhaseName,
    },
}

impl PipelineEvent {
    /// Lowest verbosity at which the event is visible
    fn min_level(&self) -> Verbosity {
        match self {
            Self::PipelineDone { .. } | Self::PipelineAborted { .. } | Self::PipelineCancelled { .. } => {
                Verbosity::Quiet
            }
            Self::PhaseStarted { .. } | Self::AgentOutput { .. } => Verbosity::Verbose,
            _ => Verbosity::Default,
        }
    }
}

/// Human-friendly duration, seconds precision past one second
pub fn fmt_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

/// Render one event, `None` when the verbosity suppresses it
pub fn render(event: &PipelineEvent, verbosity: Verbosity) -> Option<String> {
    if verbosity < event.min_level() {
        return None;
    }

    let line = match event {
        PipelineEvent::PipelineStarted { task, resumed_at } => match resumed_at {
            Some(phase) => format!("{} (resuming at {})", task.to_string().bold(), phase.as_str()),
            None => format!("{}", task.to_string().bold()),
        },
        PipelineEvent::PhaseStarted { phase, attempt, model } => {
            format!("  {} started (attempt {attempt}, model {model})", phase.as_str())
                .dimmed()
                .to_string()
        }
        PipelineEvent::PhaseSucceeded {
            phase,
            attempts,
            duration_ms,
        } => {
            let timing = if *attempts > 1 {
                format!("{} attempts, {}", attempts, fmt_duration(*duration_ms))
            } else {
                fmt_duration(*duration_ms)
            };
            format!("  {} {} ({timing})", "✓".green(), phase.as_str())
        }
        PipelineEvent::PhaseSkipped { phase } => format!("  · {} (skipped)", phase.as_str()).dimmed().to_string(),
        PipelineEvent::PhaseRetry {
            phase,
            next_attempt,
            max_attempts,
            delay_ms,
            reason,
        } => {
            format!(
                "  {} {} retry {next_attempt}/{max_attempts} in {} ({reason})",
                "↻".yellow(),
                phase.as_str(),
                fmt_duration(*delay_ms)
            )
        }
        PipelineEvent::ModelFallback { from, to } => {
            format!("  {} {from} rate limited, falling back to {to}", "⤵".cyan())
        }
        PipelineEvent::AgentOutput { phase, output } => {
            let body = output
                .trim_end()
                .lines()
                .map(|l| format!("    {l}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}\n{}", format!("    {} output:", phase.as_str()).dimmed(), body.dimmed())
        }
        PipelineEvent::PipelineDone { task, duration_ms } => {
            format!("{} {task} done ({})", "✓".green(), fmt_duration(*duration_ms))
        }
        PipelineEvent::PipelineAborted { task, phase, error } => {
            format!("{} {task} aborted at {}: {error}", "✗".red(), phase.as_str())
        }
        PipelineEvent::PipelineCancelled { task, phase } => {
            format!("{} {task} interrupted at {} (will resume)", "·".dimmed(), phase.as_str())
        }
    };
    Some(line)
}

/// Prints rendered events to stdout
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    verbosity: Verbosity,
}

impl Reporter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn emit(&self, event: &PipelineEvent) {
        if let Some(line) = render(event, self.verbosity) {
            println!("{line}");
        }
    }
}
