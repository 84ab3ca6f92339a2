//! Task model and store
//!
//! A task is a markdown file whose ID encodes priority and queue order,
//! living in one of the lifecycle directories (todo/doing/done). The store
//! pairs file moves with claim locks so concurrent orchestrator processes
//! never double-process a task.

mod file;
mod id;
mod store;

pub use file::{Criterion, TaskFile};
pub use id::{InvalidTaskId, TaskId};
pub use store::{StoreError, TaskDescriptor, TaskOutcome, TaskStatus, TaskStore};

pub(crate) use store::atomic_write;
