//! Task file content: sections, relations, acceptance criteria, work log
//!
//! A task is a markdown file named `<id>.md` living in one of the lifecycle
//! directories. The header block (everything before the first `## ` heading)
//! may carry `- Blocked-by:` / `- Blocks:` relation lines; the body is split
//! into `## ` sections (Context, Plan, Acceptance Criteria, Work Log, Notes,
//! Links). Acceptance criteria are `- [ ]` / `- [x]` checklist lines.

use tracing::warn;

use super::id::TaskId;

/// One acceptance-criteria checklist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    pub text: String,
    pub checked: bool,
}

/// Parsed view over a task's markdown content
#[derive(Debug, Clone)]
pub struct TaskFile {
    id: TaskId,
    content: String,
}

impl TaskFile {
    pub fn new(id: TaskId, content: String) -> Self {
        Self { id, content }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// First `# ` heading, if any
    pub fn title(&self) -> Option<&str> {
        self.content
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(str::trim)
    }

    /// Tasks this one waits on
    pub fn blocked_by(&self) -> Vec<TaskId> {
        self.relation_ids("blocked-by")
    }

    /// Tasks waiting on this one
    pub fn blocks(&self) -> Vec<TaskId> {
        self.relation_ids("blocks")
    }

    fn relation_ids(&self, key: &str) -> Vec<TaskId> {
        let mut ids = Vec::new();
        for line in self.header_lines() {
            let Some(rest) = strip_relation_key(line, key) else {
                continue;
            };
            for raw in rest.split([',', ' ']).filter(|s| !s.is_empty()) {
                match TaskId::parse(raw) {
                    Ok(id) => ids.push(id),
                    Err(e) => warn!(task = %self.id, %e, "ignoring malformed relation entry"),
                }
            }
        }
        ids
    }

    /// Lines before the first `## ` heading
    fn header_lines(&self) -> impl Iterator<Item = &str> {
        self.content.lines().take_while(|line| !line.starts_with("## "))
    }

    /// Content of a named `## ` section, heading matched case-insensitively
    pub fn section(&self, name: &str) -> Option<String> {
        let lines: Vec<&str> = self.content.lines().collect();
        let (start, end) = section_bounds(&lines, name)?;
        Some(lines[start + 1..end].join("\n"))
    }

    pub fn acceptance_criteria(&self) -> Vec<Criterion> {
        let Some(body) = self.section("Acceptance Criteria") else {
            return Vec::new();
        };
        body.lines()
            .filter_map(|line| {
                let line = line.trim_start();
                if let Some(text) = line.strip_prefix("- [ ] ") {
                    Some(Criterion {
                        text: text.trim().to_string(),
                        checked: false,
                    })
                } else {
                    line.strip_prefix("- [x] ")
                        .or_else(|| line.strip_prefix("- [X] "))
                        .map(|text| Criterion {
                            text: text.trim().to_string(),
                            checked: true,
                        })
                }
            })
            .collect()
    }

    /// Unchecked acceptance entries; empty means the task may complete
    pub fn unchecked_criteria(&self) -> Vec<String> {
        self.acceptance_criteria()
            .into_iter()
            .filter(|c| !c.checked)
            .map(|c| c.text)
            .collect()
    }

    /// Append one pre-formatted line to the Work Log section, creating the
    /// section at the end of the file when it is missing
    pub fn append_work_log(&mut self, line: &str) {
        let lines: Vec<&str> = self.content.lines().collect();
        match section_bounds(&lines, "Work Log") {
            Some((_, end)) => {
                // Insert before trailing blank lines so entries stay contiguous
                let mut insert_at = end;
                while insert_at > 0 && lines[insert_at - 1].trim().is_empty() {
                    insert_at -= 1;
                }
                let mut rebuilt: Vec<String> = lines[..insert_at].iter().map(|s| s.to_string()).collect();
                rebuilt.push(line.to_string());
                rebuilt.extend(lines[insert_at..].iter().map(|s| s.to_string()));
                self.content = rebuilt.join("\n");
            }
            None => {
                if !self.content.is_empty() && !self.content.ends_with('\n') {
                    self.content.push('\n');
                }
                self.content.push_str("\n## Work Log\n");
                self.content.push_str(line);
            }
        }
        if !self.content.ends_with('\n') {
            self.content.push('\n');
        }
    }
}

fn strip_relation_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let line = line.trim_start().strip_prefix("- ")?;
    let (head, rest) = line.split_once(':')?;
    if head.trim().eq_ignore_ascii_case(key) {
        Some(rest.trim())
    } else {
        None
    }
}

/// (heading line index, exclusive end index) of a `## ` section
fn section_bounds(lines: &[&str], name: &str) -> Option<(usize, usize)> {
    let start = lines.iter().position(|line| {
        line.strip_prefix("## ")
            .is_some_and(|heading| heading.trim().eq_ignore_ascii_case(name))
    })?;
    let end = lines[start + 1..]
        .iter()
        .position(|line| line.starts_with("## "))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());
    Some((start, end))
}
