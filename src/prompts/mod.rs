//! Phase prompt templates: override files, embedded defaults, rendering

mod embedded;
mod loader;

pub use loader::{PromptContext, PromptLoader};
