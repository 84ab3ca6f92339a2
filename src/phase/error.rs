//! Phase failure classification
//!
//! One variant per way a single agent invocation (or its quality gates) can
//! fail. The retry controller decides what to do with each; the helpers here
//! only classify.

use std::time::Duration;

use thiserror::Error;

use super::summary::SummaryError;

/// Errors from running one phase attempt
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent exited with status {code}: {tail}")]
    NonZeroExit { code: i32, tail: String },

    #[error("agent rate limited: {tail}")]
    RateLimited { tail: String },

    #[error("malformed summary block: {0}")]
    MalformedOutput(#[from] SummaryError),

    #[error("agent declared the phase blocked: {notes}")]
    Blocked { notes: String },

    #[error("quality gate '{gate}' failed with status {code}: {tail}")]
    GateFailed { gate: String, code: i32, tail: String },

    #[error("failed to launch agent: {0}")]
    Spawn(std::io::Error),
}

impl PhaseError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Transient failures worth another attempt with backoff
    ///
    /// Rate limits are handled by the model-fallback path and malformed
    /// output by the retry-once rule, so neither is listed here. A blocked
    /// declaration or a spawn failure will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NonZeroExit { .. } | Self::GateFailed { .. })
    }

    /// Failure output to feed into the next attempt's prompt
    pub fn retry_context(&self) -> Option<&str> {
        match self {
            Self::NonZeroExit { tail, .. } => Some(tail),
            Self::RateLimited { tail } => Some(tail),
            Self::GateFailed { tail, .. } => Some(tail),
            _ => None,
        }
    }

    /// One-line description without the output tail, for status lines and
    /// work-log entries
    pub fn brief(&self) -> String {
        match self {
            Self::Timeout(d) => format!("timed out after {}s", d.as_secs()),
            Self::NonZeroExit { code, .. } => format!("exit status {code}"),
            Self::RateLimited { .. } => "rate limited".to_string(),
            Self::MalformedOutput(e) => format!("malformed summary: {e}"),
            Self::Blocked { notes } => format!("blocked: {notes}"),
            Self::GateFailed { gate, code, .. } => format!("{gate} gate failed with status {code}"),
            Self::Spawn(e) => format!("failed to launch agent: {e}"),
        }
    }
}

/// Spot rate-limit refusals in agent output
///
/// The agent is a black box that only hands back text and an exit status, so
/// classification is by marker. Checked case-insensitively against combined
/// stdout and stderr.
pub fn looks_rate_limited(output: &str) -> bool {
    let lower = output.to_lowercase();
    ["rate limit", "rate_limit", "rate-limit", "429", "overloaded"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Last `max` characters of a string, on a char boundary
pub fn output_tail(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    s.chars().skip(count - max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PhaseError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            PhaseError::NonZeroExit {
                code: 1,
                tail: String::new()
            }
            .is_retryable()
        );
        assert!(
            PhaseError::GateFailed {
                gate: "test".to_string(),
                code: 1,
                tail: String::new()
            }
            .is_retryable()
        );
        assert!(!PhaseError::RateLimited { tail: String::new() }.is_retryable());
        assert!(
            !PhaseError::Blocked {
                notes: String::new()
            }
            .is_retryable()
        );
        assert!(!PhaseError::Spawn(std::io::Error::other("gone")).is_retryable());
    }

    #[test]
    fn test_brief_drops_the_tail() {
        let err = PhaseError::NonZeroExit {
            code: 2,
            tail: "x".repeat(2000),
        };
        assert_eq!(err.brief(), "exit status 2");

        let err = PhaseError::GateFailed {
            gate: "test".to_string(),
            code: 101,
            tail: "x".repeat(2000),
        };
        assert_eq!(err.brief(), "test gate failed with status 101");
    }

    #[test]
    fn test_rate_limit_markers() {
        assert!(looks_rate_limited("Error: rate limit exceeded"));
        assert!(looks_rate_limited("HTTP 429 Too Many Requests"));
        assert!(looks_rate_limited("api_error: Overloaded"));
        assert!(looks_rate_limited("RATE_LIMIT_ERROR"));
        assert!(!looks_rate_limited("test failed: expected 4, got 2"));
    }

    #[test]
    fn test_output_tail() {
        assert_eq!(output_tail("hello", 10), "hello");
        assert_eq!(output_tail("hello world", 5), "world");
        // Multi-byte chars stay intact
        assert_eq!(output_tail("日本語のテキスト", 3), "キスト");
    }

    #[test]
    fn test_retry_context() {
        let err = PhaseError::GateFailed {
            gate: "lint".to_string(),
            code: 2,
            tail: "unused variable".to_string(),
        };
        assert_eq!(err.retry_context(), Some("unused variable"));
        assert_eq!(PhaseError::Timeout(Duration::from_secs(1)).retry_context(), None);
    }
}
