//! External agent invocation
//!
//! The agent is a black box: a command that reads a fully rendered prompt on
//! stdin, honors a `--model` flag, and returns text output plus an exit
//! status. Everything else (timeouts, retries, output parsing) lives above
//! this seam, so tests can swap in a scripted invoker.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Raw result of one agent process run
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl AgentOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout and stderr concatenated, for failure classification and
    /// retry-prompt context
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Seam between the orchestrator and the agent binary
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run the agent once with the given prompt and model
    ///
    /// Implementations must be cancel-safe: dropping the returned future
    /// must not leave the agent process running.
    async fn invoke(&self, prompt: &str, model: &str) -> std::io::Result<AgentOutput>;
}

/// Spawns the configured agent command as a subprocess
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    command: String,
    args: Vec<String>,
}

impl CommandInvoker {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl AgentInvoker for CommandInvoker {
    async fn invoke(&self, prompt: &str, model: &str) -> std::io::Result<AgentOutput> {
        debug!(command = %self.command, model, prompt_len = prompt.len(), "spawning agent");

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg("--model")
            .arg(model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Reap the child if our future is dropped on timeout or ctrl-c
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_string();
            // Write concurrently with output collection so a large prompt
            // cannot deadlock against a full stdout pipe
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let output = child.wait_with_output().await?;
        let result = AgentOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        debug!(exit = ?result.exit_code, stdout_len = result.stdout.len(), "agent finished");
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted invoker for exercising the executor and retry layers
    //! without spawning processes.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{AgentInvoker, AgentOutput};

    #[derive(Debug)]
    pub enum Scripted {
        Output(AgentOutput),
        SpawnError(String),
        /// Never returns; exercises the timeout path
        Hang,
    }

    pub struct ScriptedInvoker {
        responses: Mutex<VecDeque<Scripted>>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedInvoker {
        pub fn new(responses: Vec<Scripted>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn models_used(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }
    }

    /// Output ending in a well-formed success summary
    pub fn success_output(notes: &str) -> AgentOutput {
        AgentOutput {
            stdout: format!("work happened\n\n--- SUMMARY ---\nstatus: success\nnotes: {notes}\n--- END ---\n"),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Output ending in a blocked summary
    pub fn blocked_output(notes: &str) -> AgentOutput {
        AgentOutput {
            stdout: format!("--- SUMMARY ---\nstatus: blocked\nnotes: {notes}\n--- END ---\n"),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Non-zero exit with the given stderr
    pub fn failed_output(code: i32, stderr: &str) -> AgentOutput {
        AgentOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(code),
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(&self, prompt: &str, model: &str) -> std::io::Result<AgentOutput> {
            self.calls.lock().unwrap().push((prompt.to_string(), model.to_string()));
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Output(output)) => Ok(output),
                Some(Scripted::SpawnError(message)) => Err(std::io::Error::other(message)),
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(std::io::Error::other("hang elapsed"))
                }
                None => panic!("agent invoked more times than scripted"),
            }
        }
    }
}
