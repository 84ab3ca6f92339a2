//! Retry and model-fallback control
//!
//! Per attempt the state machine is `Attempting -> {Success, Retryable,
//! Fatal}`. Timeouts, non-zero exits, and failed gates retry with
//! exponential backoff up to the phase's attempt budget. A rate limit
//! downgrades the model one tier and retries; the ladder is one-way and
//! sticky, and hitting the floor is fatal. Malformed output retries once,
//! then is fatal. The pipeline runner drives the loop; this module only
//! decides.
//!
//! Backoff is `min(base * 2^(n-1), cap)` after the n-th failed attempt,
//! plus up to 10% random jitter.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::phase::PhaseError;

/// Capped exponential backoff after the n-th failed attempt (1-based)
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u128.saturating_pow(attempt.saturating_sub(1));
    let ms = base.as_millis().saturating_mul(factor).min(cap.as_millis());
    Duration::from_millis(ms as u64)
}

/// Add up to 10% random jitter so concurrent instances spread out
pub fn with_jitter(delay: Duration) -> Duration {
    let jitter_max = delay.as_millis() as u64 / 10;
    if jitter_max == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=jitter_max))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no models configured")]
pub struct EmptyLadder;

/// Ordered model tiers, strongest first
///
/// Downgrades move one tier down and never back up; the ladder outlives
/// individual phases so a downgrade early in a run applies to every phase
/// after it.
#[derive(Debug, Clone)]
pub struct ModelLadder {
    tiers: Vec<String>,
    index: usize,
}

impl ModelLadder {
    pub fn new(tiers: Vec<String>) -> Result<Self, EmptyLadder> {
        if tiers.is_empty() {
            return Err(EmptyLadder);
        }
        Ok(Self { tiers, index: 0 })
    }

    /// Ladder positioned at `start`; a model outside the configured tiers
    /// becomes a single-tier ladder (explicit selection wins, no fallback)
    pub fn starting_at(tiers: Vec<String>, start: &str) -> Self {
        match tiers.iter().position(|t| t == start) {
            Some(index) => Self { tiers, index },
            None => Self {
                tiers: vec![start.to_string()],
                index: 0,
            },
        }
    }

    pub fn current(&self) -> &str {
        &self.tiers[self.index]
    }

    pub fn at_floor(&self) -> bool {
        self.index + 1 >= self.tiers.len()
    }

    /// Move one tier down; `None` at the floor
    pub fn downgrade(&mut self) -> Option<&str> {
        if self.at_floor() {
            return None;
        }
        self.index += 1;
        Some(self.current())
    }
}

/// Attempt bookkeeping for one phase
#[derive(Debug)]
pub struct PhaseAttempts {
    max_attempts: u32,
    attempts: u32,
    malformed_seen: bool,
}

impl PhaseAttempts {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
            malformed_seen: false,
        }
    }

    /// Record a new attempt and return its 1-based number
    pub fn next_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Why a phase became fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Retry budget spent
    Exhausted,
    /// Rate limited with no weaker tier left
    RateLimitedAtFloor,
    /// Second malformed summary
    MalformedTwice,
    /// Not retryable at all (blocked declaration, spawn failure)
    Unrecoverable,
}

/// What to do after a failed attempt
#[derive(Debug)]
pub enum Decision {
    Retry {
        delay: Duration,
        /// Set when the model was downgraded for the next attempt
        fallback: Option<String>,
    },
    Fatal {
        kind: FatalKind,
    },
}

/// Decides retry, fallback, or fatal for each failed attempt
#[derive(Debug)]
pub struct RetryController {
    backoff_base: Duration,
    backoff_cap: Duration,
    ladder: ModelLadder,
}

impl RetryController {
    pub fn new(backoff_base: Duration, backoff_cap: Duration, ladder: ModelLadder) -> Self {
        Self {
            backoff_base,
            backoff_cap,
            ladder,
        }
    }

    /// Model for the next attempt
    pub fn model(&self) -> &str {
        self.ladder.current()
    }

    pub fn decide(&mut self, state: &mut PhaseAttempts, error: &PhaseError) -> Decision {
        let delay = with_jitter(backoff_delay(state.attempts(), self.backoff_base, self.backoff_cap));

        if error.is_rate_limited() {
            // Ladder-bounded, not budget-bounded: a downgrade retries even
            // with the attempt budget spent
            return match self.ladder.downgrade() {
                Some(next) => {
                    debug!(model = next, "rate limited, downgrading model");
                    Decision::Retry {
                        delay,
                        fallback: Some(next.to_string()),
                    }
                }
                None => {
                    debug!("rate limited at lowest tier");
                    Decision::Fatal {
                        kind: FatalKind::RateLimitedAtFloor,
                    }
                }
            };
        }

        if matches!(error, PhaseError::MalformedOutput(_)) {
            if state.malformed_seen || state.exhausted() {
                return Decision::Fatal {
                    kind: FatalKind::MalformedTwice,
                };
            }
            state.malformed_seen = true;
            return Decision::Retry { delay, fallback: None };
        }

        if error.is_retryable() {
            if state.exhausted() {
                return Decision::Fatal {
                    kind: FatalKind::Exhausted,
                };
            }
            return Decision::Retry { delay, fallback: None };
        }

        Decision::Fatal {
            kind: FatalKind::Unrecoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::SummaryError;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn timeout_error() -> PhaseError {
        PhaseError::Timeout(secs(1))
    }

    fn rate_limited() -> PhaseError {
        PhaseError::RateLimited { tail: String::new() }
    }

    fn malformed() -> PhaseError {
        PhaseError::MalformedOutput(SummaryError::MissingEnd)
    }

    fn controller(tiers: &[&str]) -> RetryController {
        let ladder = ModelLadder::new(tiers.iter().map(|s| s.to_string()).collect()).unwrap();
        RetryController::new(secs(1), secs(60), ladder)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1, secs(1), secs(60)), secs(1));
        assert_eq!(backoff_delay(2, secs(1), secs(60)), secs(2));
        assert_eq!(backoff_delay(3, secs(1), secs(60)), secs(4));
        assert_eq!(backoff_delay(7, secs(1), secs(60)), secs(60));
        assert_eq!(backoff_delay(30, secs(1), secs(60)), secs(60));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = secs(10);
        for _ in 0..100 {
            let jittered = with_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base + secs(1));
        }
    }

    #[test]
    fn test_ladder_downgrade_is_one_way() {
        let mut ladder = ModelLadder::new(vec!["opus".into(), "sonnet".into(), "haiku".into()]).unwrap();
        assert_eq!(ladder.current(), "opus");
        assert_eq!(ladder.downgrade(), Some("sonnet"));
        assert_eq!(ladder.downgrade(), Some("haiku"));
        assert!(ladder.at_floor());
        assert_eq!(ladder.downgrade(), None);
        // Sticky at the floor
        assert_eq!(ladder.current(), "haiku");
    }

    #[test]
    fn test_ladder_rejects_empty() {
        assert_eq!(ModelLadder::new(vec![]).unwrap_err(), EmptyLadder);
    }

    #[test]
    fn test_ladder_starting_at() {
        let tiers = vec!["opus".to_string(), "sonnet".to_string(), "haiku".to_string()];
        let ladder = ModelLadder::starting_at(tiers.clone(), "sonnet");
        assert_eq!(ladder.current(), "sonnet");
        assert!(!ladder.at_floor());

        let single = ModelLadder::starting_at(tiers, "custom-model");
        assert_eq!(single.current(), "custom-model");
        assert!(single.at_floor());
    }

    #[test]
    fn test_timeout_retries_until_exhausted() {
        let mut controller = controller(&["opus"]);
        let mut state = PhaseAttempts::new(3);

        state.next_attempt();
        assert!(matches!(
            controller.decide(&mut state, &timeout_error()),
            Decision::Retry { fallback: None, .. }
        ));

        state.next_attempt();
        assert!(matches!(controller.decide(&mut state, &timeout_error()), Decision::Retry { .. }));

        state.next_attempt();
        assert!(matches!(
            controller.decide(&mut state, &timeout_error()),
            Decision::Fatal {
                kind: FatalKind::Exhausted
            }
        ));
        assert_eq!(state.retries(), 2);
    }

    #[test]
    fn test_retry_delay_grows() {
        let mut controller = controller(&["opus"]);
        let mut state = PhaseAttempts::new(5);

        state.next_attempt();
        let Decision::Retry { delay: first, .. } = controller.decide(&mut state, &timeout_error()) else {
            panic!("expected retry");
        };
        state.next_attempt();
        let Decision::Retry { delay: second, .. } = controller.decide(&mut state, &timeout_error()) else {
            panic!("expected retry");
        };
        // Jitter adds at most 10%, so doubling always dominates
        assert!(second > first);
    }

    #[test]
    fn test_rate_limit_downgrades_then_fatal_at_floor() {
        let mut controller = controller(&["opus", "sonnet"]);
        let mut state = PhaseAttempts::new(3);

        state.next_attempt();
        match controller.decide(&mut state, &rate_limited()) {
            Decision::Retry { fallback: Some(model), .. } => assert_eq!(model, "sonnet"),
            other => panic!("expected downgrade, got {other:?}"),
        }
        assert_eq!(controller.model(), "sonnet");

        state.next_attempt();
        assert!(matches!(
            controller.decide(&mut state, &rate_limited()),
            Decision::Fatal {
                kind: FatalKind::RateLimitedAtFloor
            }
        ));
        // Still at the floor, never upgraded
        assert_eq!(controller.model(), "sonnet");
    }

    #[test]
    fn test_downgrade_survives_across_phases() {
        let mut controller = controller(&["opus", "sonnet"]);

        let mut first_phase = PhaseAttempts::new(3);
        first_phase.next_attempt();
        let _ = controller.decide(&mut first_phase, &rate_limited());
        assert_eq!(controller.model(), "sonnet");

        // A fresh phase keeps the downgraded model
        let second_phase = PhaseAttempts::new(3);
        assert_eq!(controller.model(), "sonnet");
        drop(second_phase);
    }

    #[test]
    fn test_rate_limit_not_budget_bounded() {
        let mut controller = controller(&["opus", "sonnet"]);
        let mut state = PhaseAttempts::new(1);

        state.next_attempt();
        assert!(matches!(
            controller.decide(&mut state, &rate_limited()),
            Decision::Retry { fallback: Some(_), .. }
        ));
    }

    #[test]
    fn test_malformed_retries_once_then_fatal() {
        let mut controller = controller(&["opus"]);
        let mut state = PhaseAttempts::new(5);

        state.next_attempt();
        assert!(matches!(controller.decide(&mut state, &malformed()), Decision::Retry { .. }));

        state.next_attempt();
        assert!(matches!(
            controller.decide(&mut state, &malformed()),
            Decision::Fatal {
                kind: FatalKind::MalformedTwice
            }
        ));
    }

    #[test]
    fn test_blocked_is_unrecoverable() {
        let mut controller = controller(&["opus", "sonnet"]);
        let mut state = PhaseAttempts::new(3);

        state.next_attempt();
        let blocked = PhaseError::Blocked {
            notes: "missing credentials".to_string(),
        };
        assert!(matches!(
            controller.decide(&mut state, &blocked),
            Decision::Fatal {
                kind: FatalKind::Unrecoverable
            }
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_never_exceeds_cap(attempt in 1u32..64, base_ms in 1u64..10_000, cap_ms in 1u64..600_000) {
                let delay = backoff_delay(attempt, Duration::from_millis(base_ms), Duration::from_millis(cap_ms));
                prop_assert!(delay <= Duration::from_millis(cap_ms));
            }

            #[test]
            fn delay_is_monotonic(attempt in 1u32..32) {
                let base = Duration::from_millis(500);
                let cap = Duration::from_secs(60);
                let current = backoff_delay(attempt, base, cap);
                let next = backoff_delay(attempt + 1, base, cap);
                prop_assert!(next >= current);
            }
        }
    }
}
