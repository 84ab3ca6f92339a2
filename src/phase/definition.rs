//! Phase names, ordering, and static per-phase definitions
//!
//! The pipeline order is fixed: EXPAND, TRIAGE, PLAN, IMPLEMENT, TEST, DOCS,
//! REVIEW, VERIFY. EXPAND and DOCS may be skipped via configuration; the
//! rest always run. Definitions are static configuration, never mutated at
//! runtime.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One step of the task pipeline
///
/// Variant order is pipeline order, so the derived `Ord` sorts phases the
/// way they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Expand,
    Triage,
    Plan,
    Implement,
    Test,
    Docs,
    Review,
    Verify,
}

impl PhaseName {
    /// Pipeline order
    pub const ALL: [PhaseName; 8] = [
        Self::Expand,
        Self::Triage,
        Self::Plan,
        Self::Implement,
        Self::Test,
        Self::Docs,
        Self::Review,
        Self::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expand => "expand",
            Self::Triage => "triage",
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Test => "test",
            Self::Docs => "docs",
            Self::Review => "review",
            Self::Verify => "verify",
        }
    }

    /// Position in the pipeline, zero-based
    pub fn ordinal(&self) -> usize {
        Self::ALL.iter().position(|p| p == self).unwrap_or(0)
    }

    /// Whether configuration may skip this phase
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Expand | Self::Docs)
    }

    /// Built-in wall-clock budget, overridable via config and environment
    pub fn default_timeout(&self) -> Duration {
        let ms: u64 = match self {
            Self::Expand => 300_000,
            Self::Triage => 180_000,
            Self::Plan => 600_000,
            Self::Implement => 1_800_000,
            Self::Test => 900_000,
            Self::Docs => 600_000,
            Self::Review => 900_000,
            Self::Verify => 600_000,
        };
        Duration::from_millis(ms)
    }

    /// Environment variable carrying this phase's timeout override (seconds)
    pub fn env_timeout_var(&self) -> String {
        format!("DOYAKEN_TIMEOUT_{}", self.as_str().to_uppercase())
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for PhaseName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown phase: {}", s))
    }
}

/// Resolved definition for one phase of a run
#[derive(Debug, Clone)]
pub struct PhaseDef {
    pub name: PhaseName,
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Configured off; recorded as skipped without execution
    pub skip: bool,
}
