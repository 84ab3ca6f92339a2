//! Configuration types and layered loading
//!
//! Precedence, lowest to highest: built-in defaults, the global file
//! (`~/.config/doyaken/doyaken.yml`), the project manifest
//! (`.doyaken/doyaken.yml`), `DOYAKEN_*` environment variables, CLI flags.
//! Files are deep-merged as YAML mappings before deserialization so a
//! project manifest can override single keys. An explicit `--config` path
//! replaces the file chain entirely.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info};

use crate::gates::Gate;
use crate::phase::{PhaseDef, PhaseName};

/// Main doyaken configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External agent invocation
    pub agent: AgentConfig,

    /// Retry and backoff policy
    pub retry: RetryConfig,

    /// Phase skips and timeout overrides
    pub phases: PhasesConfig,

    /// Claim lock behavior
    pub lock: LockConfig,

    /// Quality gate commands
    pub gates: GatesConfig,
}

impl Config {
    /// Load configuration from the file chain
    ///
    /// With an explicit path only that file is read. Otherwise the global
    /// file and the project manifest are merged, project over global.
    /// Unreadable or unparseable files are errors, not warnings; a broken
    /// config must never silently fall back to defaults.
    pub fn load(explicit: Option<&Path>, workspace: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            let config = Self::read_layer(path)?
                .ok_or_else(|| eyre!("config file not found: {}", path.display()))?;
            info!(path = %path.display(), "loaded config");
            return serde_yaml::from_value(config).wrap_err("invalid configuration");
        }

        let mut merged: Option<Value> = None;
        let layers = [
            dirs::config_dir().map(|d| d.join("doyaken").join("doyaken.yml")),
            Some(workspace.join(".doyaken").join("doyaken.yml")),
        ];
        for path in layers.into_iter().flatten() {
            if let Some(layer) = Self::read_layer(&path)? {
                debug!(path = %path.display(), "merged config layer");
                merged = Some(match merged {
                    Some(base) => merge_yaml(base, layer),
                    None => layer,
                });
            }
        }

        match merged {
            Some(value) => serde_yaml::from_value(value).wrap_err("invalid configuration"),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn read_layer(path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(path).wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        let value =
            serde_yaml::from_str(&content).wrap_err_with(|| format!("failed to parse config {}", path.display()))?;
        Ok(Some(value))
    }

    /// Apply `DOYAKEN_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(command) = std::env::var("DOYAKEN_AGENT") {
            self.agent.command = command;
        }
        if let Ok(model) = std::env::var("DOYAKEN_MODEL") {
            self.agent.model = Some(model);
        }
        if let Ok(raw) = std::env::var("DOYAKEN_MAX_ATTEMPTS") {
            self.retry.max_attempts = raw
                .parse()
                .map_err(|_| eyre!("DOYAKEN_MAX_ATTEMPTS must be a number, got {raw:?}"))?;
        }
        for phase in PhaseName::ALL {
            let var = phase.env_timeout_var();
            if let Ok(raw) = std::env::var(&var) {
                let secs: u64 = raw.parse().map_err(|_| eyre!("{var} must be seconds, got {raw:?}"))?;
                self.phases.timeouts_ms.insert(phase, secs * 1000);
            }
        }
        Ok(())
    }

    /// Validate configuration before touching any task
    ///
    /// Failures here are fatal at startup (exit code 2).
    pub fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(eyre!("agent.command must not be empty"));
        }
        if self.agent.models.is_empty() {
            return Err(eyre!("agent.models must list at least one model"));
        }
        if self.retry.max_attempts == 0 {
            return Err(eyre!("retry.max-attempts must be at least 1"));
        }
        if self.retry.backoff_base_ms == 0 {
            return Err(eyre!("retry.backoff-base-ms must be positive"));
        }
        if self.retry.backoff_cap_ms < self.retry.backoff_base_ms {
            return Err(eyre!("retry.backoff-cap-ms must not be below retry.backoff-base-ms"));
        }
        if self.lock.staleness_secs == 0 {
            return Err(eyre!("lock.staleness-secs must be positive"));
        }
        if self.gates.timeout_ms == 0 {
            return Err(eyre!("gates.timeout-ms must be positive"));
        }
        for phase in &self.phases.skip {
            if !phase.is_skippable() {
                return Err(eyre!("phase {} cannot be skipped", phase.as_str()));
            }
        }
        for (phase, ms) in &self.phases.timeouts_ms {
            if *ms == 0 {
                return Err(eyre!("phases.timeouts-ms.{} must be positive", phase.as_str()));
            }
        }
        Ok(())
    }

    /// Resolved per-phase definitions in pipeline order
    pub fn phase_defs(&self) -> Vec<PhaseDef> {
        PhaseName::ALL
            .into_iter()
            .map(|name| PhaseDef {
                name,
                timeout: self
                    .phases
                    .timeouts_ms
                    .get(&name)
                    .map(|ms| Duration::from_millis(*ms))
                    .unwrap_or_else(|| name.default_timeout()),
                max_attempts: self.retry.max_attempts,
                skip: self.phases.skip.contains(&name),
            })
            .collect()
    }
}

/// External agent invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent binary or command name
    pub command: String,

    /// Base arguments, before `--model`
    pub args: Vec<String>,

    /// Explicit starting model; outside the ladder it disables fallback
    pub model: Option<String>,

    /// Fallback ladder, strongest first
    pub models: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            model: None,
            models: vec!["opus".to_string(), "sonnet".to_string(), "haiku".to_string()],
        }
    }
}

/// Retry and backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt budget per phase
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(rename = "backoff-cap-ms")]
    pub backoff_cap_ms: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
        }
    }
}

/// Phase skips and timeout overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasesConfig {
    /// Phases to record as skipped; only EXPAND and DOCS qualify
    pub skip: Vec<PhaseName>,

    /// Per-phase timeout overrides in milliseconds
    #[serde(rename = "timeouts-ms")]
    pub timeouts_ms: BTreeMap<PhaseName, u64>,
}

impl Default for PhasesConfig {
    fn default() -> Self {
        Self {
            skip: vec![PhaseName::Expand],
            timeouts_ms: BTreeMap::new(),
        }
    }
}

/// Claim lock behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which a lock counts as abandoned
    #[serde(rename = "staleness-secs")]
    pub staleness_secs: u64,
}

impl LockConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { staleness_secs: 3_600 }
    }
}

/// Quality gate commands, run with `sh -c`
///
/// An unset command means the gate is skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatesConfig {
    pub build: Option<String>,
    pub test: Option<String>,
    pub lint: Option<String>,
    pub format: Option<String>,

    /// Per-command timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl GatesConfig {
    pub fn command_for(&self, gate: Gate) -> Option<&str> {
        match gate {
            Gate::Build => self.build.as_deref(),
            Gate::Test => self.test.as_deref(),
            Gate::Lint => self.lint.as_deref(),
            Gate::Format => self.format.as_deref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            build: None,
            test: None,
            lint: None,
            format: None,
            timeout_ms: 600_000,
        }
    }
}

/// Recursive YAML merge, `over` winning; mappings merge key by key
fn merge_yaml(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Mapping(mut base), Value::Mapping(over)) => {
            for (key, value) in over {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, over) => over,
    }
}

/// Find the workspace root by walking up from `start` to a directory
/// containing `.doyaken`
pub fn find_workspace(start: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(".doyaken").is_dir() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}
