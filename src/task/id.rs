//! Task ID parsing and ordering
//!
//! All task IDs use the format: `{priority}-{sequence}-{slug}`
//! Example: `003-001-add-login` (priority 3, sequence 1)
//!
//! Priority runs 1 (highest) to 4 (lowest). Queue order is priority
//! ascending, then sequence ascending.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a string is not a well-formed task ID
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task id '{id}': {reason}")]
pub struct InvalidTaskId {
    pub id: String,
    pub reason: String,
}

impl InvalidTaskId {
    fn new(id: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Composite task identifier: priority, sequence, slug
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    priority: u8,
    sequence: u16,
    slug: String,
}

impl TaskId {
    /// Parse from the canonical `NNN-NNN-slug` form
    pub fn parse(s: &str) -> Result<Self, InvalidTaskId> {
        let mut parts = s.splitn(3, '-');

        let priority_part = parts.next().filter(|p| !p.is_empty());
        let sequence_part = parts.next();
        let slug_part = parts.next();

        let (Some(priority_raw), Some(sequence_raw), Some(slug)) = (priority_part, sequence_part, slug_part) else {
            return Err(InvalidTaskId::new(s, "expected priority-sequence-slug"));
        };

        let priority: u8 = priority_raw
            .parse()
            .map_err(|_| InvalidTaskId::new(s, "priority is not a number"))?;
        if !(1..=4).contains(&priority) {
            return Err(InvalidTaskId::new(s, "priority must be 1-4"));
        }

        let sequence: u16 = sequence_raw
            .parse()
            .map_err(|_| InvalidTaskId::new(s, "sequence is not a number"))?;
        if sequence == 0 {
            return Err(InvalidTaskId::new(s, "sequence must be >= 1"));
        }

        if slug.is_empty() {
            return Err(InvalidTaskId::new(s, "slug is empty"));
        }
        if slug.starts_with('-') || slug.ends_with('-') {
            return Err(InvalidTaskId::new(s, "slug has a leading or trailing hyphen"));
        }
        if !slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(InvalidTaskId::new(s, "slug must be lowercase [a-z0-9-]"));
        }

        Ok(Self {
            priority,
            sequence,
            slug: slug.to_string(),
        })
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Filename for this task within a lifecycle directory
    pub fn filename(&self) -> String {
        format!("{}.md", self)
    }

    /// Filename for this task's lock record
    pub fn lock_filename(&self) -> String {
        format!("{}.lock", self)
    }

    /// Filename for this task's pipeline checkpoint
    pub fn run_filename(&self) -> String {
        format!("{}.json", self)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}-{:03}-{}", self.priority, self.sequence, self.slug)
    }
}

impl FromStr for TaskId {
    type Err = InvalidTaskId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for TaskId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = TaskId::parse("003-001-add-login").unwrap();
        assert_eq!(id.priority(), 3);
        assert_eq!(id.sequence(), 1);
        assert_eq!(id.slug(), "add-login");
    }

    #[test]
    fn test_display_roundtrip() {
        let id = TaskId::parse("001-042-fix-race").unwrap();
        assert_eq!(id.to_string(), "001-042-fix-race");
    }

    #[test]
    fn test_parse_unpadded_is_normalized() {
        let id = TaskId::parse("1-7-tidy").unwrap();
        assert_eq!(id.to_string(), "001-007-tidy");
    }

    #[test]
    fn test_parse_rejects_priority_out_of_range() {
        assert!(TaskId::parse("000-001-x").is_err());
        assert!(TaskId::parse("005-001-x").is_err());
    }

    #[test]
    fn test_parse_rejects_zero_sequence() {
        assert!(TaskId::parse("002-000-x").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_slug() {
        assert!(TaskId::parse("002-001-").is_err());
        assert!(TaskId::parse("002-001-Bad").is_err());
        assert!(TaskId::parse("002-001--x").is_err());
        assert!(TaskId::parse("002-001-x-").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(TaskId::parse("").is_err());
        assert!(TaskId::parse("003").is_err());
        assert!(TaskId::parse("003-001").is_err());
    }

    #[test]
    fn test_ordering_priority_then_sequence() {
        let a = TaskId::parse("001-002-b").unwrap();
        let b = TaskId::parse("001-010-a").unwrap();
        let c = TaskId::parse("002-001-c").unwrap();
        let mut ids = vec![c.clone(), b.clone(), a.clone()];
        ids.sort();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_filenames() {
        let id = TaskId::parse("003-001-add-login").unwrap();
        assert_eq!(id.filename(), "003-001-add-login.md");
        assert_eq!(id.lock_filename(), "003-001-add-login.lock");
        assert_eq!(id.run_filename(), "003-001-add-login.json");
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = TaskId::parse("004-003-cleanup").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"004-003-cleanup\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_display_roundtrip(
                priority in 1u8..=4,
                sequence in 1u16..=999,
                slug in "[a-z][a-z0-9]{0,8}(-[a-z0-9]{1,8}){0,3}",
            ) {
                let formatted = format!("{:03}-{:03}-{}", priority, sequence, slug);
                let id = TaskId::parse(&formatted).unwrap();
                prop_assert_eq!(id.to_string(), formatted);
                prop_assert_eq!(id.priority(), priority);
                prop_assert_eq!(id.sequence(), sequence);
            }

            #[test]
            fn ordering_matches_priority_sequence(
                p1 in 1u8..=4, s1 in 1u16..=999,
                p2 in 1u8..=4, s2 in 1u16..=999,
            ) {
                let a = TaskId::parse(&format!("{:03}-{:03}-same", p1, s1)).unwrap();
                let b = TaskId::parse(&format!("{:03}-{:03}-same", p2, s2)).unwrap();
                prop_assert_eq!(a.cmp(&b), (p1, s1).cmp(&(p2, s2)));
            }
        }
    }
}
