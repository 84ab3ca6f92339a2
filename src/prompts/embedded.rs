//! Embedded fallback prompts
//!
//! Compiled into the binary and used when no override file exists for a
//! phase. Every template ends with the same summary-block contract so the
//! executor can parse the agent's final status.

use crate::phase::PhaseName;

const EXPAND: &str = r#"# EXPAND phase: task {{task-id}}

You are expanding a terse task stub into a workable description.

Task file: {{task-file}}
Time: {{timestamp}}

## Current task body

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Rewrite the task body in place ({{task-file}}) so it has a clear problem
   statement and an `## Acceptance Criteria` section with `- [ ]` items.
2. Keep the first line (the `# {{task-id}}` heading) and any `- Blocked-by:`
   or `- Blocks:` bullets unchanged.
3. Do not start implementing.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line on what you changed>
--- END ---

Use `status: blocked` only if the task cannot be expanded without information
you do not have.
"#;

const TRIAGE: &str = r#"# TRIAGE phase: task {{task-id}}

You are deciding whether this task is actionable as written.

Task file: {{task-file}}
Time: {{timestamp}}

## Task

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Read the task and skim the relevant parts of the repository.
2. Confirm the scope is clear and the acceptance criteria are checkable.
3. Record open concerns in the task file under a `## Notes` section.
4. Make no code changes.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line verdict>
--- END ---

Use `status: blocked` if the task cannot proceed without a human decision,
and say why in the notes.
"#;

const PLAN: &str = r#"# PLAN phase: task {{task-id}}

You are writing the implementation plan for this task.

Task file: {{task-file}}
Time: {{timestamp}}

## Task

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Study the code paths the task touches.
2. Write a `## Plan` section into {{task-file}}: ordered steps, files to
   change, and how each acceptance criterion will be verified.
3. Prefer the smallest change that satisfies the criteria.
4. Make no code changes yet.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line describing the plan>
--- END ---

Use `status: blocked` only if planning is impossible without outside input.
"#;

const IMPLEMENT: &str = r#"# IMPLEMENT phase: task {{task-id}}

You are implementing the plan recorded in the task file.

Task file: {{task-file}}
Time: {{timestamp}}

## Task

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Follow the `## Plan` section step by step.
2. Make the code changes; keep unrelated files untouched.
3. Leave tests and docs to their own phases unless the plan says otherwise.
4. If the plan turns out to be wrong, note the deviation in the task file's
   `## Work Log` and do what is right.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line on what was built>
--- END ---

Use `status: blocked` only for hard external obstacles, not for difficulty.
"#;

const TEST: &str = r#"# TEST phase: task {{task-id}}

You are making the test suite prove this task's changes.

Task file: {{task-file}}
Time: {{timestamp}}

## Task

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Run the project's test suite.
2. Add or adjust tests so the changed behavior is covered, including the
   failure paths named in the acceptance criteria.
3. Fix the implementation where tests expose real defects.
4. Leave the suite green.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line on coverage and results>
--- END ---

Use `status: blocked` only if the suite cannot run in this environment.
"#;

const DOCS: &str = r#"# DOCS phase: task {{task-id}}

You are updating documentation affected by this task.

Task file: {{task-file}}
Time: {{timestamp}}

## Task

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Find docs, doc comments, and examples the change makes stale.
2. Update them to match the new behavior; add nothing speculative.
3. Skip docs that are already accurate.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line on what was updated>
--- END ---

Use `status: blocked` only if the documentation source is unavailable.
"#;

const REVIEW: &str = r#"# REVIEW phase: task {{task-id}}

You are reviewing the changes made for this task as a critical colleague.

Task file: {{task-file}}
Time: {{timestamp}}

## Task

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Read the full diff of this task's changes.
2. Look for defects, dead code, missed edge cases, and style drift.
3. Fix what you find; record notable findings in the task file's
   `## Work Log`.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line on findings>
--- END ---

Use `status: blocked` only if the changes cannot be reviewed at all.
"#;

const VERIFY: &str = r#"# VERIFY phase: task {{task-id}}

You are the final check before this task is marked done.

Task file: {{task-file}}
Time: {{timestamp}}

## Task

{{task-body}}

{{previous-summary}}{{previous-failure}}## Instructions

1. Go through the `## Acceptance Criteria` one by one and verify each
   against the actual behavior.
2. Tick satisfied items (`- [x]`) in {{task-file}}.
3. If a criterion is not met, fix it or report blocked; never tick an
   unmet item.

End your output with exactly this block:

--- SUMMARY ---
status: success
notes: <one line confirming the criteria>
--- END ---

Use `status: blocked` when a criterion cannot be satisfied, and name it.
"#;

/// Embedded template for a phase
pub fn for_phase(phase: PhaseName) -> &'static str {
    match phase {
        PhaseName::Expand => EXPAND,
        PhaseName::Triage => TRIAGE,
        PhaseName::Plan => PLAN,
        PhaseName::Implement => IMPLEMENT,
        PhaseName::Test => TEST,
        PhaseName::Docs => DOCS,
        PhaseName::Review => REVIEW,
        PhaseName::Verify => VERIFY,
    }
}
