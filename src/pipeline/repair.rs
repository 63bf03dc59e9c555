//! Bounded SQL repair loop.
//!
//! The termination guarantee is structural: an attempt counter capped at
//! `MAX_REPAIR_ATTEMPTS` and an explicit terminal `Exhausted` phase, rather
//! than recursive retry. For any sequence of failures the pipeline performs
//! at most 1 + MAX_REPAIR_ATTEMPTS executions.

use crate::db::executor::ExecutionResult;
use crate::pipeline::types::SqlCandidate;

pub const MAX_REPAIR_ATTEMPTS: u8 = 2;

/// Where a SQL candidate sits in its lifecycle.
#[derive(Debug)]
pub enum SqlPhase {
    Generated(SqlCandidate),
    Executed {
        candidate: SqlCandidate,
        result: ExecutionResult,
    },
    /// Terminal: the repair budget is spent and the last execution still
    /// failed. Forwarded to the synthesizer, never retried.
    Exhausted {
        candidate: SqlCandidate,
        result: ExecutionResult,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum RepairDecision {
    Retry { next_attempt: u8 },
    Exhausted,
}

/// Monotonic attempt counter. Attempts only increase and never pass the cap.
#[derive(Debug, Default)]
pub struct RepairTracker {
    attempts: u8,
}

impl RepairTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn register_failure(&mut self) -> RepairDecision {
        if self.attempts >= MAX_REPAIR_ATTEMPTS {
            RepairDecision::Exhausted
        } else {
            self.attempts += 1;
            RepairDecision::Retry {
                next_attempt: self.attempts,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_retries_then_exhausted() {
        let mut tracker = RepairTracker::new();
        assert_eq!(
            tracker.register_failure(),
            RepairDecision::Retry { next_attempt: 1 }
        );
        assert_eq!(
            tracker.register_failure(),
            RepairDecision::Retry { next_attempt: 2 }
        );
        assert_eq!(tracker.register_failure(), RepairDecision::Exhausted);
        // Stays exhausted no matter how many failures follow.
        for _ in 0..10 {
            assert_eq!(tracker.register_failure(), RepairDecision::Exhausted);
        }
        assert_eq!(tracker.attempts(), MAX_REPAIR_ATTEMPTS);
    }

    #[test]
    fn attempts_are_monotonic() {
        let mut tracker = RepairTracker::new();
        let mut last = tracker.attempts();
        for _ in 0..5 {
            tracker.register_failure();
            assert!(tracker.attempts() >= last);
            assert!(tracker.attempts() <= MAX_REPAIR_ATTEMPTS);
            last = tracker.attempts();
        }
    }
}
