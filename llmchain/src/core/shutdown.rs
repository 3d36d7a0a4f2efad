//! Shutdown evaluation for a running chain.
//!
//! Conditions are checked in a fixed priority order and the first match wins:
//! explicit signals (manual stop, `ALL_DONE`) come before budgets (deadline,
//! runtime, rounds), which come before the text heuristic over the handoff.

use chrono::NaiveDate;

use crate::core::types::{STATUS_ALL_DONE, ShutdownDecision, ShutdownReason};

/// Marker counted by the consecutive-block detector (matched case-insensitively).
pub const BLOCK_MARKER: &str = "BLOCKED";

/// Default for [`ShutdownLimits::max_consecutive_blocks`].
pub const DEFAULT_MAX_CONSECUTIVE_BLOCKS: usize = 3;

/// Point-in-time view of the chain state fields the evaluator reads.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub status: String,
    pub round: u64,
    pub runtime_hours: f64,
    pub handoff: String,
    /// `Some` when a stop was requested; holds the stored reason.
    pub stop_reason: Option<String>,
}

/// Budgets taken from the chain definition. Zero disables a limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownLimits {
    pub max_rounds: u64,
    pub runtime_hours: f64,
    pub max_consecutive_blocks: usize,
    pub deadline: Option<NaiveDate>,
}

impl Default for ShutdownLimits {
    fn default() -> Self {
        Self {
            max_rounds: 0,
            runtime_hours: 0.0,
            max_consecutive_blocks: DEFAULT_MAX_CONSECUTIVE_BLOCKS,
            deadline: None,
        }
    }
}

/// Decide whether the chain should stop after the current round.
pub fn check_shutdown(
    snapshot: &StateSnapshot,
    limits: &ShutdownLimits,
    today: NaiveDate,
) -> ShutdownDecision {
    if let Some(reason) = &snapshot.stop_reason {
        return ShutdownDecision::Stop(ShutdownReason::ManualStop {
            reason: reason.clone(),
        });
    }

    if snapshot.status == STATUS_ALL_DONE {
        return ShutdownDecision::Stop(ShutdownReason::AllTasksDone);
    }

    if let Some(deadline) = limits.deadline
        && today > deadline
    {
        return ShutdownDecision::Stop(ShutdownReason::DeadlineReached { deadline });
    }

    if limits.runtime_hours > 0.0 && snapshot.runtime_hours >= limits.runtime_hours {
        return ShutdownDecision::Stop(ShutdownReason::RuntimeExceeded {
            elapsed_hours: snapshot.runtime_hours,
            budget_hours: limits.runtime_hours,
        });
    }

    if limits.max_rounds > 0 && snapshot.round >= limits.max_rounds {
        return ShutdownDecision::Stop(ShutdownReason::MaxRounds {
            round: snapshot.round,
            limit: limits.max_rounds,
        });
    }

    if limits.max_consecutive_blocks > 0 {
        let count = count_trailing_blocks(&snapshot.handoff);
        if count >= limits.max_consecutive_blocks {
            return ShutdownDecision::Stop(ShutdownReason::MaxBlocks { count });
        }
    }

    ShutdownDecision::Continue
}

/// Count the run of lines containing [`BLOCK_MARKER`] at the end of `handoff`.
///
/// Blank lines are skipped without ending the run; the first other non-empty
/// line ends the scan.
pub fn count_trailing_blocks(handoff: &str) -> usize {
    let mut count = 0;
    for line in handoff.trim().lines().rev() {
        if line.to_uppercase().contains(BLOCK_MARKER) {
            count += 1;
        } else if !line.trim().is_empty() {
            break;
        }
    }
    count
}
