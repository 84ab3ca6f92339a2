//! Structured summary block parser
//!
//! Every phase must end its output with a summary block:
//!
//! ```text
//! --- SUMMARY ---
//! status: success
//! notes: one line of detail
//! --- END ---
//! ```
//!
//! The grammar is strict: the block sits at the very end of the output
//! (only blank lines may follow), `status` is mandatory and one of
//! `success`/`blocked`, `notes` is optional, and anything else between the
//! markers is rejected. Parse failures surface as `MalformedOutput` rather
//! than a silent default.

use thiserror::Error;

const START_MARKER: &str = "--- SUMMARY ---";
const END_MARKER: &str = "--- END ---";

/// Phase outcome as declared by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStatus {
    Success,
    /// The agent declared it cannot proceed; not a transient failure
    Blocked,
}

impl std::fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Parsed summary block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSummary {
    pub status: SummaryStatus,
    pub notes: Option<String>,
}

/// Why a summary block failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryError {
    #[error("output does not end with '{END_MARKER}'")]
    MissingEnd,

    #[error("no '{START_MARKER}' marker before the end marker")]
    MissingStart,

    #[error("line inside summary block is not 'key: value': '{0}'")]
    InvalidLine(String),

    #[error("unknown summary key: '{0}'")]
    UnknownKey(String),

    #[error("duplicate summary key: '{0}'")]
    DuplicateKey(String),

    #[error("summary block is missing 'status'")]
    MissingStatus,

    #[error("invalid status value: '{0}' (expected success|blocked)")]
    InvalidStatus(String),
}

/// Parse the summary block from the tail of a phase's output
pub fn parse_summary(output: &str) -> Result<PhaseSummary, SummaryError> {
    let lines: Vec<&str> = output.lines().collect();

    let mut end = lines.len();
    while end > 0 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    if end == 0 || lines[end - 1].trim() != END_MARKER {
        return Err(SummaryError::MissingEnd);
    }

    let start = lines[..end - 1]
        .iter()
        .rposition(|line| line.trim() == START_MARKER)
        .ok_or(SummaryError::MissingStart)?;

    let mut status: Option<SummaryStatus> = None;
    let mut notes: Option<String> = None;

    for line in &lines[start + 1..end - 1] {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| SummaryError::InvalidLine(line.to_string()))?;
        let value = value.trim();
        match key.trim() {
            "status" => {
                if status.is_some() {
                    return Err(SummaryError::DuplicateKey("status".to_string()));
                }
                status = Some(match value {
                    "success" => SummaryStatus::Success,
                    "blocked" => SummaryStatus::Blocked,
                    other => return Err(SummaryError::InvalidStatus(other.to_string())),
                });
            }
            "notes" => {
                if notes.is_some() {
                    return Err(SummaryError::DuplicateKey("notes".to_string()));
                }
                notes = Some(value.to_string());
            }
            other => return Err(SummaryError::UnknownKey(other.to_string())),
        }
    }

    Ok(PhaseSummary {
        status: status.ok_or(SummaryError::MissingStatus)?,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let output = "did some work\n\n--- SUMMARY ---\nstatus: success\nnotes: added the endpoint\n--- END ---\n";
        let summary = parse_summary(output).unwrap();
        assert_eq!(summary.status, SummaryStatus::Success);
        assert_eq!(summary.notes.as_deref(), Some("added the endpoint"));
    }

    #[test]
    fn test_parse_blocked_without_notes() {
        let output = "--- SUMMARY ---\nstatus: blocked\n--- END ---";
        let summary = parse_summary(output).unwrap();
        assert_eq!(summary.status, SummaryStatus::Blocked);
        assert_eq!(summary.notes, None);
    }

    #[test]
    fn test_trailing_blank_lines_are_fine() {
        let output = "--- SUMMARY ---\nstatus: success\n--- END ---\n\n   \n";
        assert!(parse_summary(output).is_ok());
    }

    #[test]
    fn test_blank_lines_inside_block_are_fine() {
        let output = "--- SUMMARY ---\n\nstatus: success\n\n--- END ---\n";
        assert!(parse_summary(output).is_ok());
    }

    #[test]
    fn test_missing_block() {
        assert_eq!(parse_summary("just prose\n"), Err(SummaryError::MissingEnd));
        assert_eq!(parse_summary(""), Err(SummaryError::MissingEnd));
    }

    #[test]
    fn test_end_without_start() {
        let output = "status: success\n--- END ---\n";
        assert_eq!(parse_summary(output), Err(SummaryError::MissingStart));
    }

    #[test]
    fn test_content_after_end_marker() {
        let output = "--- SUMMARY ---\nstatus: success\n--- END ---\nmore prose\n";
        assert_eq!(parse_summary(output), Err(SummaryError::MissingEnd));
    }

    #[test]
    fn test_unknown_key() {
        let output = "--- SUMMARY ---\nstatus: success\nmood: great\n--- END ---\n";
        assert_eq!(parse_summary(output), Err(SummaryError::UnknownKey("mood".to_string())));
    }

    #[test]
    fn test_duplicate_status() {
        let output = "--- SUMMARY ---\nstatus: success\nstatus: blocked\n--- END ---\n";
        assert_eq!(parse_summary(output), Err(SummaryError::DuplicateKey("status".to_string())));
    }

    #[test]
    fn test_missing_status() {
        let output = "--- SUMMARY ---\nnotes: all good\n--- END ---\n";
        assert_eq!(parse_summary(output), Err(SummaryError::MissingStatus));
    }

    #[test]
    fn test_status_is_case_sensitive() {
        let output = "--- SUMMARY ---\nstatus: Success\n--- END ---\n";
        assert_eq!(
            parse_summary(output),
            Err(SummaryError::InvalidStatus("Success".to_string()))
        );
    }

    #[test]
    fn test_free_text_inside_block() {
        let output = "--- SUMMARY ---\nstatus: success\nno colon here\n--- END ---\n";
        assert!(matches!(parse_summary(output), Err(SummaryError::InvalidLine(_))));
    }

    #[test]
    fn test_last_block_wins() {
        let output = "--- SUMMARY ---\nstatus: blocked\n--- END ---\nrevised\n--- SUMMARY ---\nstatus: success\n--- END ---\n";
        let summary = parse_summary(output).unwrap();
        assert_eq!(summary.status, SummaryStatus::Success);
    }

    #[test]
    fn test_notes_value_may_contain_colon() {
        let output = "--- SUMMARY ---\nstatus: success\nnotes: see src/main.rs: line 10\n--- END ---\n";
        let summary = parse_summary(output).unwrap();
        assert_eq!(summary.notes.as_deref(), Some("see src/main.rs: line 10"));
    }
}
