//! Prompt loader
//!
//! Loads phase templates from override files or falls back to embedded
//! defaults, then renders them with a fixed variable set. Templates are
//! pure substitution, no helpers; optional blocks (previous summary,
//! previous failure) arrive pre-formatted or empty.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use eyre::{Result, eyre};
use handlebars::{Handlebars, no_escape};
use serde::Serialize;
use tracing::debug;

use super::embedded;
use crate::phase::PhaseName;
use crate::task::TaskId;

/// Variables available to every template
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PromptContext {
    pub task_id: String,
    pub task_file: String,
    pub timestamp: String,
    pub phase: String,
    pub task_body: String,
    /// Pre-formatted block carrying the previous phase's summary notes,
    /// empty on the first phase
    pub previous_summary: String,
    /// Pre-formatted block carrying the previous attempt's failure output,
    /// empty on the first attempt
    pub previous_failure: String,
}

impl PromptContext {
    pub fn new(id: &TaskId, task_path: &Path, task_body: &str, phase: PhaseName) -> Self {
        Self {
            task_id: id.to_string(),
            task_file: task_path.display().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            phase: phase.to_string(),
            task_body: task_body.to_string(),
            previous_summary: String::new(),
            previous_failure: String::new(),
        }
    }

    /// Attach the previous phase's summary notes
    pub fn with_previous_summary(mut self, notes: &str) -> Self {
        if !notes.trim().is_empty() {
            self.previous_summary = format!("## Previous phase summary\n\n{}\n\n", notes.trim());
        }
        self
    }

    /// Attach the failure context from the last attempt at this phase
    pub fn with_failure(mut self, context: &str) -> Self {
        if !context.trim().is_empty() {
            self.previous_failure = format!(
                "## Previous attempt failed\n\nOutput tail of the failed attempt:\n\n```\n{}\n```\n\nAddress the failure before finishing.\n\n",
                context.trim()
            );
        }
        self
    }
}

/// Loads and renders phase templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// Project overrides, `.doyaken/prompts/`
    project_dir: Option<PathBuf>,
    /// User overrides, `~/.config/doyaken/prompts/`
    user_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Loader for a workspace, picking up override directories that exist
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        let project_dir = workspace.as_ref().join(".doyaken").join("prompts");
        let user_dir = dirs::config_dir().map(|d| d.join("doyaken").join("prompts"));
        Self::with_dirs(
            project_dir.exists().then_some(project_dir),
            user_dir.filter(|d| d.exists()),
        )
    }

    /// Loader that only uses embedded templates
    pub fn embedded_only() -> Self {
        Self::with_dirs(None, None)
    }

    fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(no_escape);
        Self {
            hbs,
            project_dir,
            user_dir,
        }
    }

    /// Template text for a phase
    ///
    /// Checks in order: project override, user override, embedded default.
    fn load_template(&self, phase: PhaseName) -> Result<String> {
        let filename = format!("{}.md", phase.as_str());

        for dir in [&self.project_dir, &self.user_dir].into_iter().flatten() {
            let path = dir.join(&filename);
            if path.exists() {
                debug!(path = %path.display(), "loading prompt override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("failed to read prompt override {}: {}", path.display(), e));
            }
        }

        debug!(phase = %phase, "using embedded prompt");
        Ok(embedded::for_phase(phase).to_string())
    }

    /// Render the template for a phase with the given context
    pub fn render(&self, phase: PhaseName, context: &PromptContext) -> Result<String> {
        let template = self.load_template(phase)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("failed to render {} prompt: {}", phase, e))
    }
}
