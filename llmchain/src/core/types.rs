//! Shared deterministic types for chain core logic.
//!
//! These types define stable contracts between core components. They must not
//! depend on external state or I/O.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Status value that marks every task of the chain as finished.
pub const STATUS_ALL_DONE: &str = "ALL_DONE";
/// Status reported when no status has ever been written.
pub const STATUS_UNKNOWN: &str = "UNKNOWN";
/// Status written by `reset`.
pub const STATUS_READY: &str = "READY";
/// Status written while the round loop is active.
pub const STATUS_RUNNING: &str = "RUNNING";
/// Status written when the round loop ends for any reason other than `ALL_DONE`.
pub const STATUS_STOPPED: &str = "STOPPED";

/// How often the links of a chain are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// Every link runs exactly once.
    Once,
    /// Links repeat round after round until a shutdown condition holds.
    Loop,
}

/// Role a link plays within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkRole {
    #[default]
    Worker,
    Reviewer,
    Controller,
}

impl LinkRole {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkRole::Worker => "worker",
            LinkRole::Reviewer => "reviewer",
            LinkRole::Controller => "controller",
        }
    }
}

/// Event after which the after-chain agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AfterTrigger {
    /// The loop ended because a time, round or deadline budget ran out.
    #[default]
    LoopComplete,
    /// The chain reported that all tasks are done.
    AllDone,
    /// The loop ended for any reason, including blocks and manual stops.
    AnyEnd,
}

/// Why the shutdown evaluator decided to stop a chain.
///
/// `Display` renders the stable, machine-checkable reason string that is also
/// shown to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    ManualStop { reason: String },
    AllTasksDone,
    DeadlineReached { deadline: NaiveDate },
    RuntimeExceeded { elapsed_hours: f64, budget_hours: f64 },
    MaxRounds { round: u64, limit: u64 },
    MaxBlocks { count: usize },
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::ManualStop { reason } => write!(f, "MANUAL_STOP: {reason}"),
            ShutdownReason::AllTasksDone => f.write_str("ALL_TASKS_DONE"),
            ShutdownReason::DeadlineReached { deadline } => {
                write!(f, "DEADLINE_REACHED: {}", deadline.format("%Y-%m-%d"))
            }
            ShutdownReason::RuntimeExceeded {
                elapsed_hours,
                budget_hours,
            } => write!(f, "RUNTIME_EXCEEDED: {elapsed_hours:.1}h / {budget_hours}h"),
            ShutdownReason::MaxRounds { round, limit } => write!(f, "MAX_ROUNDS: {round}/{limit}"),
            ShutdownReason::MaxBlocks { count } => write!(f, "MAX_BLOCKS: {count}"),
        }
    }
}

/// Result of one shutdown evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownDecision {
    Continue,
    Stop(ShutdownReason),
}

impl ShutdownDecision {
    pub fn should_stop(&self) -> bool {
        matches!(self, ShutdownDecision::Stop(_))
    }

    /// Reason string for the decision; empty when the chain continues.
    pub fn reason(&self) -> String {
        match self {
            ShutdownDecision::Continue => String::new(),
            ShutdownDecision::Stop(reason) => reason.to_string(),
        }
    }
}
