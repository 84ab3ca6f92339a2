//! Pipeline state machine and run session
//!
//! `PipelineRunner` drives one claimed task through the configured phases:
//! render prompt, invoke the agent, run quality gates, consult the retry
//! controller, checkpoint after every transition. `Session` sits above it
//! and decides which tasks run: recovery first, then the todo queue in
//! priority order, skipping blocked and already-claimed tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use eyre::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::agent::AgentInvoker;
use crate::config::Config;
use crate::gates::run_phase_gates;
use crate::phase::{PhaseDef, PhaseError, PhaseExecutor, PhaseName};
use crate::prompts::{PromptContext, PromptLoader};
use crate::report::{PipelineEvent, Reporter};
use crate::retry::{Decision, ModelLadder, PhaseAttempts, RetryController};
use crate::task::{StoreError, TaskDescriptor, TaskId, TaskOutcome, TaskStatus, TaskStore};

use super::checkpoint::{PipelineRun, RunOutcome, RunStore};

/// How one task's run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRunOutcome {
    /// Every phase passed and the task moved to done
    Done,
    /// A phase went fatal; the task moved back to todo
    Aborted { phase: PhaseName, error: String },
    /// Interrupted; the task stays in doing with its lock released
    Cancelled,
}

/// How one phase ended, internal to the runner
enum PhaseVerdict {
    Succeeded {
        attempts: u32,
        duration_ms: u64,
        notes: Option<String>,
    },
    Fatal {
        attempts: u32,
        error: String,
    },
    Cancelled,
}

/// Drives one claimed task through the phase pipeline
pub struct PipelineRunner {
    config: Config,
    workspace: PathBuf,
    store: TaskStore,
    runs: RunStore,
    prompts: PromptLoader,
    executor: PhaseExecutor,
    reporter: Reporter,
    agent_id: String,
    cancel: watch::Receiver<bool>,
}

impl PipelineRunner {
    pub fn new(
        config: Config,
        workspace: PathBuf,
        invoker: Arc<dyn AgentInvoker>,
        reporter: Reporter,
        agent_id: String,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let store = TaskStore::new(&workspace, config.lock.staleness());
        let runs = RunStore::new(&workspace);
        let prompts = PromptLoader::new(&workspace);
        let log_path = workspace.join(".doyaken").join("logs").join("invocations.jsonl");
        let executor = PhaseExecutor::new(invoker, log_path);
        Self {
            config,
            workspace,
            store,
            runs,
            prompts,
            executor,
            reporter,
            agent_id,
            cancel,
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Run one already-claimed task to Done, Aborted, or Cancelled
    ///
    /// Releases the claim on every path: done on success, back to todo on
    /// abort, lock-only release on cancellation so the checkpoint resumes
    /// in place.
    pub async fn run_task(&self, desc: &TaskDescriptor) -> Result<TaskRunOutcome> {
        let phases = self.config.phase_defs();
        let started = Instant::now();

        let prior = self.runs.load(&desc.id)?.filter(|run| {
            let aligned = run.phases.len() == phases.len()
                && run.phases.iter().zip(&phases).all(|(r, d)| r.phase == d.name);
            if !aligned {
                warn!(task = %desc.id, "checkpoint phase list does not match configuration, starting over");
            }
            aligned
        });

        let (mut run, ladder) = match prior {
            // Crash or cancellation mid-run: resume with the pinned model
            Some(run) if run.outcome.is_none() => {
                let ladder = self.ladder(Some(&run.model))?;
                (run, ladder)
            }
            // A rerun after a fatal abort keeps phase history, fresh ladder
            Some(mut run) => {
                let ladder = self.ladder(None)?;
                run.outcome = None;
                run.set_model(ladder.current());
                (run, ladder)
            }
            None => {
                let ladder = self.ladder(None)?;
                let run = PipelineRun::new(
                    desc.id.clone(),
                    self.agent_id.clone(),
                    ladder.current(),
                    phases.iter().map(|p| p.name),
                );
                (run, ladder)
            }
        };
        run.agent = self.agent_id.clone();

        let start = run.resume_index().unwrap_or(phases.len());
        let resumed_at = (start > 0 && start < phases.len()).then(|| phases[start].name);
        info!(task = %desc.id, model = %run.model, start_phase = start, "pipeline starting");
        self.reporter.emit(&PipelineEvent::PipelineStarted {
            task: desc.id.clone(),
            resumed_at,
        });
        self.runs.save(&run)?;

        let mut controller = RetryController::new(
            self.config.retry.backoff_base(),
            self.config.retry.backoff_cap(),
            ladder,
        );
        let mut cancel = self.cancel.clone();

        for def in &phases[start..] {
            if *cancel.borrow() {
                return self.cancel_run(desc, &mut run, def.name);
            }
            if def.skip {
                run.skip(def.name);
                self.runs.save(&run)?;
                self.reporter.emit(&PipelineEvent::PhaseSkipped { phase: def.name });
                continue;
            }

            let index = def.name.ordinal();
            let previous_notes = run.notes_before(index).map(str::to_string);
            let verdict = self
                .run_phase(desc, def, &mut run, &mut controller, previous_notes.as_deref(), &mut cancel)
                .await?;

            match verdict {
                PhaseVerdict::Succeeded {
                    attempts,
                    duration_ms,
                    notes,
                } => {
                    run.succeed(def.name, attempts, duration_ms, notes);
                    self.runs.save(&run)?;
                    self.reporter.emit(&PipelineEvent::PhaseSucceeded {
                        phase: def.name,
                        attempts,
                        duration_ms,
                    });
                    let retries = attempts.saturating_sub(1);
                    if retries > 0 {
                        let noun = if retries == 1 { "retry" } else { "retries" };
                        self.store
                            .append_work_log(&desc.id, &work_log_line(def.name, &format!("succeeded after {retries} {noun}")))?;
                    }
                }
                PhaseVerdict::Fatal { attempts, error } => {
                    return self.abort_run(desc, &mut run, def.name, attempts, &error);
                }
                PhaseVerdict::Cancelled => {
                    return self.cancel_run(desc, &mut run, def.name);
                }
            }
        }

        self.finish_done(desc, &mut run, started)
    }

    /// Run one phase to success or a fatal verdict, retrying as the
    /// controller allows
    async fn run_phase(
        &self,
        desc: &TaskDescriptor,
        def: &PhaseDef,
        run: &mut PipelineRun,
        controller: &mut RetryController,
        previous_notes: Option<&str>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<PhaseVerdict> {
        let mut attempts = PhaseAttempts::new(def.max_attempts);
        let mut failure_context: Option<String> = None;
        let started = Instant::now();

        loop {
            let attempt = attempts.next_attempt();
            run.begin(def.name, attempt);
            self.runs.save(run)?;
            self.reporter.emit(&PipelineEvent::PhaseStarted {
                phase: def.name,
                attempt,
                model: controller.model().to_string(),
            });

            // Re-read the task every attempt; earlier phases edit the file
            let task = self.store.read(desc)?;
            let mut context = PromptContext::new(&desc.id, &desc.path, task.content(), def.name);
            if let Some(notes) = previous_notes {
                context = context.with_previous_summary(notes);
            }
            if let Some(tail) = failure_context.as_deref() {
                context = context.with_failure(tail);
            }
            let prompt = self.prompts.render(def.name, &context)?;

            let executed = tokio::select! {
                _ = cancel_requested(cancel) => return Ok(PhaseVerdict::Cancelled),
                result = self.executor.execute(&desc.id, def, &prompt, controller.model(), attempt) => result,
            };

            // Gates run only after the agent itself succeeded
            let executed = match executed {
                Ok(execution) => match run_phase_gates(def.name, &self.config.gates, &self.workspace).await {
                    None => Ok(execution),
                    Some(failure) => Err(PhaseError::GateFailed {
                        gate: failure.gate.to_string(),
                        code: failure.code,
                        tail: failure.tail,
                    }),
                },
                Err(e) => Err(e),
            };

            let error = match executed {
                Ok(execution) => {
                    self.reporter.emit(&PipelineEvent::AgentOutput {
                        phase: def.name,
                        output: execution.output.combined(),
                    });
                    return Ok(PhaseVerdict::Succeeded {
                        attempts: attempts.attempts(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        notes: execution.summary.notes,
                    });
                }
                Err(error) => error,
            };

            // A malformed summary has no useful output tail; feed the parse
            // error into the next attempt instead
            failure_context = match &error {
                PhaseError::MalformedOutput(_) => Some(error.brief()),
                other => other.retry_context().map(str::to_string),
            };

            match controller.decide(&mut attempts, &error) {
                Decision::Retry { delay, fallback } => {
                    warn!(task = %desc.id, phase = %def.name, error = %error, "attempt failed, retrying");
                    match fallback {
                        Some(next) => {
                            self.reporter.emit(&PipelineEvent::ModelFallback {
                                from: run.model.clone(),
                                to: next.clone(),
                            });
                            run.set_model(next);
                            self.runs.save(run)?;
                        }
                        None => {
                            self.reporter.emit(&PipelineEvent::PhaseRetry {
                                phase: def.name,
                                next_attempt: attempts.attempts() + 1,
                                max_attempts: def.max_attempts,
                                delay_ms: delay.as_millis() as u64,
                                reason: error.brief(),
                            });
                        }
                    }
                    tokio::select! {
                        _ = cancel_requested(cancel) => return Ok(PhaseVerdict::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Decision::Fatal { kind } => {
                    warn!(task = %desc.id, phase = %def.name, ?kind, error = %error, "phase fatal");
                    return Ok(PhaseVerdict::Fatal {
                        attempts: attempts.attempts(),
                        error: error.brief(),
                    });
                }
            }
        }
    }

    fn ladder(&self, pinned: Option<&str>) -> Result<ModelLadder> {
        let tiers = self.config.agent.models.clone();
        // An explicit model override always wins over a checkpoint pin
        match self.config.agent.model.as_deref().or(pinned) {
            Some(start) => Ok(ModelLadder::starting_at(tiers, start)),
            None => Ok(ModelLadder::new(tiers)?),
        }
    }

    fn abort_run(
        &self,
        desc: &TaskDescriptor,
        run: &mut PipelineRun,
        phase: PhaseName,
        attempts: u32,
        error: &str,
    ) -> Result<TaskRunOutcome> {
        run.fail(phase, attempts, error);
        run.finish(RunOutcome::Aborted);
        self.runs.save(run)?;

        let noun = if attempts == 1 { "attempt" } else { "attempts" };
        self.store
            .append_work_log(&desc.id, &work_log_line(phase, &format!("aborted after {attempts} {noun}: {error}")))?;
        self.store.release(&desc.id, TaskOutcome::Failure)?;

        self.reporter.emit(&PipelineEvent::PipelineAborted {
            task: desc.id.clone(),
            phase,
            error: error.to_string(),
        });
        Ok(TaskRunOutcome::Aborted {
            phase,
            error: error.to_string(),
        })
    }

    fn cancel_run(&self, desc: &TaskDescriptor, run: &mut PipelineRun, phase: PhaseName) -> Result<TaskRunOutcome> {
        run.abort(phase);
        self.runs.save(run)?;
        self.store.unclaim(&desc.id)?;
        info!(task = %desc.id, phase = %phase, "run interrupted");
        self.reporter.emit(&PipelineEvent::PipelineCancelled {
            task: desc.id.clone(),
            phase,
        });
        Ok(TaskRunOutcome::Cancelled)
    }

    fn finish_done(&self, desc: &TaskDescriptor, run: &mut PipelineRun, started: Instant) -> Result<TaskRunOutcome> {
        match self.store.release(&desc.id, TaskOutcome::Success) {
            Ok(()) => {}
            Err(StoreError::AcceptanceUnmet { unchecked, .. }) => {
                let phase = run.phases.last().map(|r| r.phase).unwrap_or(PhaseName::Verify);
                let error = format!("acceptance criteria unchecked: {}", unchecked.join("; "));
                warn!(task = %desc.id, %error, "refusing the done transition");

                self.store.append_work_log(&desc.id, &work_log_line(phase, &error))?;
                run.finish(RunOutcome::Aborted);
                self.runs.save(run)?;
                self.store.release(&desc.id, TaskOutcome::Failure)?;

                self.reporter.emit(&PipelineEvent::PipelineAborted {
                    task: desc.id.clone(),
                    phase,
                    error: error.clone(),
                });
                return Ok(TaskRunOutcome::Aborted { phase, error });
            }
            Err(e) => return Err(e.into()),
        }

        // The checkpoint has served its purpose once the task is in done
        self.runs.delete(&desc.id)?;
        info!(task = %desc.id, "pipeline done");
        self.reporter.emit(&PipelineEvent::PipelineDone {
            task: desc.id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        Ok(TaskRunOutcome::Done)
    }
}

/// What a `dk run` invocation should process
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Upper bound on tasks processed from the queue
    pub count: usize,
    /// Run exactly this task instead of pulling from the queue
    pub task: Option<TaskId>,
    /// Print what would run without claiming or mutating anything
    pub dry_run: bool,
}

/// Tally of one session's task outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub done: u32,
    pub aborted: u32,
    pub cancelled: bool,
}

impl SessionSummary {
    /// True when nothing failed and nothing was interrupted
    pub fn clean(&self) -> bool {
        self.aborted == 0 && !self.cancelled
    }

    fn tally(&mut self, outcome: &TaskRunOutcome) {
        match outcome {
            TaskRunOutcome::Done => self.done += 1,
            TaskRunOutcome::Aborted { .. } => self.aborted += 1,
            TaskRunOutcome::Cancelled => self.cancelled = true,
        }
    }
}

/// Selects tasks and feeds them to the runner
pub struct Session {
    runner: PipelineRunner,
}

impl Session {
    pub fn new(runner: PipelineRunner) -> Self {
        Self { runner }
    }

    pub async fn run(&self, plan: &RunPlan) -> Result<SessionSummary> {
        self.runner.store.ensure_layout()?;
        match &plan.task {
            Some(id) => self.run_requested(id, plan.dry_run).await,
            None => self.run_queue(plan).await,
        }
    }

    /// Run one specific task; claim conflicts and pending blockers are
    /// errors here, not skips
    async fn run_requested(&self, id: &TaskId, dry_run: bool) -> Result<SessionSummary> {
        let store = &self.runner.store;
        let desc = store
            .find(id)?
            .ok_or_else(|| eyre::eyre!("task {id} not found"))?;

        if desc.status == TaskStatus::Todo {
            let task = store.read(&desc)?;
            let pending = store.blockers_pending(&task)?;
            if !pending.is_empty() {
                let names: Vec<String> = pending.iter().map(ToString::to_string).collect();
                return Err(eyre::eyre!("task {id} is blocked by: {}", names.join(", ")));
            }
        }

        if dry_run {
            self.print_plan(&desc)?;
            return Ok(SessionSummary::default());
        }

        let claimed = store.claim(id, &self.runner.agent_id)?;
        let mut summary = SessionSummary::default();
        summary.tally(&self.runner.run_task(&claimed).await?);
        Ok(summary)
    }

    /// Pull from the queue: interrupted work first, then todo in priority
    /// order, skipping blocked and already-claimed tasks
    async fn run_queue(&self, plan: &RunPlan) -> Result<SessionSummary> {
        let store = &self.runner.store;
        let mut summary = SessionSummary::default();
        let mut processed = 0usize;

        let mut queue = store.scan_recoverable()?;
        queue.extend(store.list(TaskStatus::Todo)?);

        for desc in queue {
            if processed >= plan.count || summary.cancelled {
                break;
            }
            if self.runner.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            // Recovery claims already passed their blocker check once
            if desc.status == TaskStatus::Todo {
                let task = store.read(&desc)?;
                let pending = store.blockers_pending(&task)?;
                if !pending.is_empty() {
                    debug!(task = %desc.id, blockers = ?pending, "skipping blocked task");
                    continue;
                }
            }

            if plan.dry_run {
                self.print_plan(&desc)?;
                processed += 1;
                continue;
            }

            let claimed = match store.claim(&desc.id, &self.runner.agent_id) {
                Ok(claimed) => claimed,
                Err(e) if e.is_lock_held() => {
                    debug!(task = %desc.id, "claimed elsewhere, skipping");
                    continue;
                }
                Err(StoreError::AlreadyDone { .. } | StoreError::NotFound { .. }) => {
                    debug!(task = %desc.id, "task moved since listing, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            summary.tally(&self.runner.run_task(&claimed).await?);
            processed += 1;
        }

        if processed == 0 && !plan.dry_run {
            info!("no runnable tasks");
        }
        Ok(summary)
    }

    fn print_plan(&self, desc: &TaskDescriptor) -> Result<()> {
        let resume = self
            .runner
            .runs
            .load(&desc.id)?
            .and_then(|run| run.resume_index().map(|i| run.phases[i].phase));
        match resume {
            Some(phase) => println!("would run {} (resuming at {})", desc.id, phase.as_str()),
            None => println!("would run {}", desc.id),
        }
        Ok(())
    }
}

/// Resolves once cancellation is requested, never otherwise
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        // Sender gone without a request; nothing will ever arrive
        std::future::pending::<()>().await;
    }
}

fn work_log_line(phase: PhaseName, message: &str) -> String {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    format!("- {stamp} [{phase}] {message}")
}
