//! Phase definitions and execution
//!
//! A phase is one discrete step of the task pipeline, run as a single
//! external agent invocation under a wall-clock timeout. The executor is a
//! pure "run once" primitive; retry and fallback policy live in the retry
//! controller.

mod definition;
mod error;
mod executor;
mod summary;

pub use definition::{PhaseDef, PhaseName};
pub use error::{PhaseError, looks_rate_limited, output_tail};
pub use executor::{InvocationRecord, PhaseExecution, PhaseExecutor};
pub use summary::{PhaseSummary, SummaryError, SummaryStatus, parse_summary};
