//! Persistent run state for one chain.
//!
//! [`ChainState`] wraps a [`StateStore`] and exposes the per-field operations
//! the round loop needs: status, round counter, start time, the shared handoff
//! document, per-link handoff snapshots and the stop request. Fields are stored
//! independently, so every getter tolerates a partially initialized chain.

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::shutdown::{ShutdownLimits, StateSnapshot, check_shutdown};
use crate::core::skip::SkipHeuristic;
use crate::core::types::{STATUS_READY, STATUS_UNKNOWN, ShutdownDecision};
use crate::io::store::{StateKey, StateStore, validate_name};

/// Stop reason stored when none is given.
pub const DEFAULT_STOP_REASON: &str = "Manual stop";

/// A stored field exists but cannot be parsed into its expected type.
#[derive(Debug, Error)]
#[error("corrupt {field} for chain {chain}: {value:?} ({detail})")]
pub struct CorruptStateError {
    pub chain: String,
    pub field: &'static str,
    pub value: String,
    pub detail: String,
}

/// Handle on the persisted state of a single chain.
#[derive(Debug)]
pub struct ChainState<S> {
    chain: String,
    store: S,
    skip: SkipHeuristic,
}

impl<S: StateStore> ChainState<S> {
    /// Open the state of `chain`, allocating storage on first use.
    pub fn open(chain: impl Into<String>, store: S) -> Result<Self> {
        let chain = chain.into();
        validate_name("chain", &chain)?;
        store.prepare(&chain)?;
        Ok(Self {
            chain,
            store,
            skip: SkipHeuristic::default(),
        })
    }

    /// Replace the thresholds used by [`ChainState::protect_from_skip`].
    pub fn with_skip_heuristic(mut self, skip: SkipHeuristic) -> Self {
        self.skip = skip;
        self
    }

    pub fn chain_name(&self) -> &str {
        &self.chain
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn read(&self, key: &StateKey) -> Result<Option<String>> {
        self.store.read(&self.chain, key)
    }

    fn write(&self, key: &StateKey, value: &str) -> Result<()> {
        self.store.write(&self.chain, key, value)
    }

    fn corrupt(&self, key: &StateKey, value: &str, detail: impl ToString) -> anyhow::Error {
        CorruptStateError {
            chain: self.chain.clone(),
            field: key.label(),
            value: value.to_string(),
            detail: detail.to_string(),
        }
        .into()
    }

    // --- status ---

    /// Stored status, or `"UNKNOWN"` if none was ever written.
    pub fn get_status(&self) -> Result<String> {
        Ok(self
            .read(&StateKey::Status)?
            .map(|status| status.trim().to_string())
            .unwrap_or_else(|| STATUS_UNKNOWN.to_string()))
    }

    pub fn set_status(&self, status: &str) -> Result<()> {
        debug!(chain = %self.chain, status, "set status");
        self.write(&StateKey::Status, status)
    }

    // --- rounds ---

    /// Completed rounds; 0 when the counter was never written.
    pub fn get_round(&self) -> Result<u64> {
        let key = StateKey::Round;
        match self.read(&key)? {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|err| self.corrupt(&key, &raw, err)),
        }
    }

    /// Advance the round counter by one and return the new value.
    pub fn increment_round(&self) -> Result<u64> {
        let next = self.get_round()? + 1;
        self.write(&StateKey::Round, &next.to_string())?;
        debug!(chain = %self.chain, round = next, "round incremented");
        Ok(next)
    }

    // --- runtime ---

    /// Stamp the current time as the start of the run.
    pub fn record_start(&self) -> Result<()> {
        self.record_start_at(Local::now())
    }

    pub fn record_start_at(&self, at: DateTime<Local>) -> Result<()> {
        self.write(&StateKey::StartTime, &at.to_rfc3339())
    }

    /// Start of the run, if one was recorded.
    ///
    /// Accepts RFC 3339 and naive ISO-8601 timestamps (read as local time).
    pub fn get_start_time(&self) -> Result<Option<DateTime<Local>>> {
        let key = StateKey::StartTime;
        let Some(raw) = self.read(&key)? else {
            return Ok(None);
        };
        let text = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(Some(parsed.with_timezone(&Local)));
        }
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|err| self.corrupt(&key, &raw, err))?;
        let local = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| self.corrupt(&key, &raw, "not a valid local time"))?;
        Ok(Some(local))
    }

    /// Hours elapsed since the last [`ChainState::record_start`]; 0.0 if never started.
    pub fn get_runtime_hours(&self) -> Result<f64> {
        self.get_runtime_hours_at(Local::now())
    }

    pub fn get_runtime_hours_at(&self, now: DateTime<Local>) -> Result<f64> {
        Ok(match self.get_start_time()? {
            Some(start) => (now - start).num_milliseconds() as f64 / 3_600_000.0,
            None => 0.0,
        })
    }

    // --- handoff ---

    /// Shared handoff document; empty if never written.
    pub fn get_handoff(&self) -> Result<String> {
        Ok(self.read(&StateKey::Handoff)?.unwrap_or_default())
    }

    pub fn write_handoff(&self, content: &str) -> Result<()> {
        self.write(&StateKey::Handoff, content)
    }

    /// Copy the shared handoff into `link`'s snapshot and return the copied text.
    pub fn save_link_handoff(&self, link: &str) -> Result<String> {
        validate_name("link", link)?;
        let current = self.get_handoff()?;
        self.write(&StateKey::LinkHandoff(link.to_string()), &current)?;
        Ok(current)
    }

    /// Last handoff snapshot attributed to `link`.
    pub fn get_link_handoff(&self, link: &str) -> Result<Option<String>> {
        validate_name("link", link)?;
        self.read(&StateKey::LinkHandoff(link.to_string()))
    }

    /// Undo a skip note that replaced the shared handoff.
    ///
    /// The post-link handoff always lands in `link`'s snapshot. If it looks like
    /// a skip and `handoff_before` has content, the shared handoff is restored
    /// to `handoff_before` and `true` is returned.
    pub fn protect_from_skip(&self, link: &str, handoff_before: &str) -> Result<bool> {
        validate_name("link", link)?;
        let after = self.get_handoff()?;
        self.write(&StateKey::LinkHandoff(link.to_string()), &after)?;

        if self.skip.is_skip(&after, handoff_before) && !handoff_before.trim().is_empty() {
            self.write_handoff(handoff_before)?;
            warn!(
                chain = %self.chain,
                link,
                skip_len = after.chars().count(),
                restored_len = handoff_before.chars().count(),
                "link overwrote handoff with a skip note, restored previous handoff"
            );
            return Ok(true);
        }
        Ok(false)
    }

    // --- stop request ---

    pub fn request_stop(&self, reason: &str) -> Result<()> {
        info!(chain = %self.chain, reason, "stop requested");
        self.write(&StateKey::StopRequest, reason)
    }

    pub fn is_stop_requested(&self) -> Result<bool> {
        Ok(self.read(&StateKey::StopRequest)?.is_some())
    }

    pub fn get_stop_reason(&self) -> Result<Option<String>> {
        Ok(self
            .read(&StateKey::StopRequest)?
            .map(|reason| reason.trim().to_string()))
    }

    // --- shutdown ---

    /// Read every field the shutdown evaluator needs.
    pub fn snapshot(&self) -> Result<StateSnapshot> {
        self.snapshot_at(Local::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Local>) -> Result<StateSnapshot> {
        Ok(StateSnapshot {
            status: self.get_status()?,
            round: self.get_round()?,
            runtime_hours: self.get_runtime_hours_at(now)?,
            handoff: self.get_handoff()?,
            stop_reason: self.get_stop_reason()?,
        })
    }

    /// Evaluate the shutdown conditions against the current state.
    pub fn check_shutdown(&self, limits: &ShutdownLimits) -> Result<ShutdownDecision> {
        self.check_shutdown_at(limits, Local::now())
    }

    pub fn check_shutdown_at(
        &self,
        limits: &ShutdownLimits,
        now: DateTime<Local>,
    ) -> Result<ShutdownDecision> {
        let snapshot = self.snapshot_at(now)?;
        Ok(check_shutdown(&snapshot, limits, now.date_naive()))
    }

    // --- reset ---

    /// Return the chain to a fresh `READY` state.
    ///
    /// Per-link snapshots are kept as an audit trail.
    pub fn reset(&self) -> Result<()> {
        self.set_status(STATUS_READY)?;
        self.write(&StateKey::Round, "0")?;
        self.store.remove(&self.chain, &StateKey::StartTime)?;
        self.store.remove(&self.chain, &StateKey::StopRequest)?;
        self.write_handoff(&reset_handoff(Local::now()))?;
        info!(chain = %self.chain, "state reset");
        Ok(())
    }
}

/// Handoff document written by [`ChainState::reset`].
pub fn reset_handoff(now: DateTime<Local>) -> String {
    format!(
        "# Handoff - Round 0\n\
         ## Date: {}\n\
         ## Role: INITIAL (Reset)\n\
         ## Task: None\n\
         ## Status: {STATUS_READY}\n",
        now.format("%Y-%m-%d")
    )
}
