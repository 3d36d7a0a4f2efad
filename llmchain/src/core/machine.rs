//! Round-level phase machine for a chain run.
//!
//! The loop driver feeds one [`PhaseEvent`] per boundary (start, end of round)
//! and [`next_phase`] decides where the run goes. Stop causes are collected in
//! [`LoopStop`], which also decides whether the after-chain agent fires.

use std::fmt;

use crate::core::types::{AfterTrigger, ChainMode, ShutdownDecision, ShutdownReason};

/// Lifecycle phase of a chain run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
    Ready,
    Running,
    Stopped(LoopStop),
}

/// Boundary events observed by the loop driver.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    /// The loop is about to run its first round; carries the pre-run evaluation.
    Start(ShutdownDecision),
    /// A round finished; carries the post-round evaluation.
    RoundFinished {
        decision: ShutdownDecision,
        criterion_met: Option<String>,
    },
}

/// Why the round loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStop {
    /// The shutdown evaluator reported a stop.
    Shutdown(ShutdownReason),
    /// A `once` chain finished its single round.
    OnceComplete,
    /// The chain's stop criterion text appeared in the status or handoff.
    StopCriterion(String),
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStop::Shutdown(reason) => write!(f, "{reason}"),
            LoopStop::OnceComplete => f.write_str("ONCE_COMPLETE"),
            LoopStop::StopCriterion(text) => write!(f, "STOP_CRITERION: {text}"),
        }
    }
}

impl LoopStop {
    /// True if an after-agent with `trigger` should run after this stop.
    pub fn fires(&self, trigger: AfterTrigger) -> bool {
        match trigger {
            AfterTrigger::AnyEnd => true,
            AfterTrigger::AllDone => matches!(
                self,
                LoopStop::Shutdown(ShutdownReason::AllTasksDone) | LoopStop::StopCriterion(_)
            ),
            AfterTrigger::LoopComplete => matches!(
                self,
                LoopStop::OnceComplete
                    | LoopStop::Shutdown(
                        ShutdownReason::RuntimeExceeded { .. }
                            | ShutdownReason::MaxRounds { .. }
                            | ShutdownReason::DeadlineReached { .. }
                    )
            ),
        }
    }
}

/// Compute the phase after `event` for a chain in `mode`.
///
/// `Stopped` is terminal: further events leave it unchanged.
pub fn next_phase(phase: &RunPhase, mode: ChainMode, event: PhaseEvent) -> RunPhase {
    match (phase, event) {
        (RunPhase::Stopped(stop), _) => RunPhase::Stopped(stop.clone()),
        (RunPhase::Ready, PhaseEvent::Start(ShutdownDecision::Stop(reason))) => {
            RunPhase::Stopped(LoopStop::Shutdown(reason))
        }
        (RunPhase::Ready, PhaseEvent::Start(ShutdownDecision::Continue)) => RunPhase::Running,
        (
            RunPhase::Running,
            PhaseEvent::RoundFinished {
                decision,
                criterion_met,
            },
        ) => {
            if mode == ChainMode::Once {
                return RunPhase::Stopped(LoopStop::OnceComplete);
            }
            if let ShutdownDecision::Stop(reason) = decision {
                return RunPhase::Stopped(LoopStop::Shutdown(reason));
            }
            match criterion_met {
                Some(text) => RunPhase::Stopped(LoopStop::StopCriterion(text)),
                None => RunPhase::Running,
            }
        }
        // Out-of-order events leave the phase as-is.
        (phase, _) => phase.clone(),
    }
}

/// Return `criterion` if it occurs in `status` or `handoff`.
pub fn stop_criterion_met(criterion: Option<&str>, status: &str, handoff: &str) -> Option<String> {
    let criterion = criterion.map(str::trim).filter(|c| !c.is_empty())?;
    if status.contains(criterion) || handoff.contains(criterion) {
        return Some(criterion.to_string());
    }
    None
}
