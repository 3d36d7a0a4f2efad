//! Round loop driver for `llmchain start`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::machine::{LoopStop, PhaseEvent, RunPhase, next_phase, stop_criterion_met};
use crate::core::types::{STATUS_ALL_DONE, STATUS_RUNNING, STATUS_STOPPED};
use crate::io::chain_state::ChainState;
use crate::io::definition::{ChainDefinition, LinkSpec};
use crate::io::invoker::{InvokeOutcome, InvokeRequest, Invoker};
use crate::io::prompt::{LinkPromptInputs, render_link_prompt};
use crate::io::store::StateStore;

/// Inputs the loop needs beyond the definition itself.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Model for links that do not name one.
    pub default_model: String,
    /// Handoff location shown to agents.
    pub handoff_path: String,
    /// Directory for per-invocation logs.
    pub logs_dir: PathBuf,
    /// Prompt texts keyed by prompt key.
    pub prompts: BTreeMap<String, String>,
}

/// Result of one link invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkReport {
    pub link: String,
    pub round: u64,
    /// `None` when the agent could not be run at all.
    pub outcome: Option<InvokeOutcome>,
    pub error: Option<String>,
    /// The handoff was restored after a skip note.
    pub restored: bool,
}

impl LinkReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_some_and(|outcome| outcome.success)
    }
}

/// Summary of one finished round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub round: u64,
    pub links: Vec<LinkReport>,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub chain: String,
    pub started_at_round: u64,
    pub rounds_executed: u64,
    pub stop: LoopStop,
    pub after_agent: Option<LinkReport>,
}

/// Run rounds until the shutdown evaluator, the stop criterion or `once` mode
/// ends the chain, then run the after-agent if its trigger matches and at
/// least one round ran.
///
/// Agent failures are recorded in the round report and do not abort the
/// round. State I/O errors stop the loop immediately.
#[instrument(skip_all, fields(chain = %definition.name))]
pub fn run_chain<S: StateStore, I: Invoker, F: FnMut(&RoundReport)>(
    definition: &ChainDefinition,
    state: &ChainState<S>,
    invoker: &I,
    settings: &LoopSettings,
    mut on_round: F,
) -> Result<ChainOutcome> {
    let limits = definition.limits()?;
    let runner = LinkRunner {
        definition,
        state,
        invoker,
        settings,
    };

    state.record_start()?;
    if state.get_status()? != STATUS_ALL_DONE {
        state.set_status(STATUS_RUNNING)?;
    }
    let started_at_round = state.get_round()?;
    info!(
        mode = ?definition.mode,
        links = definition.links.len(),
        started_at_round,
        "chain started"
    );

    let mut phase = next_phase(
        &RunPhase::Ready,
        definition.mode,
        PhaseEvent::Start(state.check_shutdown(&limits)?),
    );
    let mut rounds_executed = 0u64;
    let stop = loop {
        if let RunPhase::Stopped(stop) = &phase {
            break stop.clone();
        }

        let round = state.get_round()? + 1;
        let mut links = Vec::with_capacity(definition.links.len());
        for link in &definition.links {
            links.push(runner.run_link(link, round)?);
        }
        state.increment_round()?;
        rounds_executed += 1;

        let decision = state.check_shutdown(&limits)?;
        let criterion_met = if decision.should_stop() {
            None
        } else {
            stop_criterion_met(
                definition.stop_criterion.as_deref(),
                &state.get_status()?,
                &state.get_handoff()?,
            )
        };
        info!(round, stop = decision.should_stop(), "round finished");
        on_round(&RoundReport { round, links });

        phase = next_phase(
            &phase,
            definition.mode,
            PhaseEvent::RoundFinished {
                decision,
                criterion_met,
            },
        );
    };

    if state.get_status()? != STATUS_ALL_DONE {
        state.set_status(STATUS_STOPPED)?;
    }
    info!(reason = %stop, rounds_executed, "chain stopped");

    // A stop found before the first round was already reported by an earlier run.
    let after_agent = match &definition.after_agent {
        Some(agent) if rounds_executed > 0 && stop.fires(agent.trigger) => {
            info!(link = %agent.link.name, trigger = ?agent.trigger, "running after-agent");
            Some(runner.run_link(&agent.link, state.get_round()?)?)
        }
        _ => None,
    };

    Ok(ChainOutcome {
        chain: definition.name.clone(),
        started_at_round,
        rounds_executed,
        stop,
        after_agent,
    })
}

struct LinkRunner<'a, S, I> {
    definition: &'a ChainDefinition,
    state: &'a ChainState<S>,
    invoker: &'a I,
    settings: &'a LoopSettings,
}

impl<S: StateStore, I: Invoker> LinkRunner<'_, S, I> {
    fn run_link(&self, link: &LinkSpec, round: u64) -> Result<LinkReport> {
        let handoff_before = self.state.get_handoff()?;
        let prompt_text = link
            .prompt
            .as_ref()
            .and_then(|key| self.settings.prompts.get(key))
            .map(String::as_str)
            .unwrap_or_default();
        let prompt = render_link_prompt(&LinkPromptInputs {
            chain: &self.definition.name,
            link: &link.name,
            role: link.role,
            description: &link.description,
            round,
            until_full: link.until_full,
            handoff_path: &self.settings.handoff_path,
            prompt: prompt_text,
        })?;
        let request = InvokeRequest {
            chain: self.definition.name.clone(),
            link: link.name.clone(),
            role: link.role,
            model: link
                .model
                .clone()
                .unwrap_or_else(|| self.settings.default_model.clone()),
            prompt,
            round,
            continue_conversation: link.continue_conversation,
            log_path: self
                .settings
                .logs_dir
                .join(format!("round-{round:04}-{}.log", link.name)),
        };

        let (outcome, error) = match self.invoker.invoke(&request) {
            Ok(outcome) => (Some(outcome), None),
            Err(err) => {
                warn!(link = %link.name, round, err = %format!("{err:#}"), "invocation failed");
                (None, Some(format!("{err:#}")))
            }
        };
        let restored = self.state.protect_from_skip(&link.name, &handoff_before)?;

        Ok(LinkReport {
            link: link.name.clone(),
            round,
            outcome,
            error,
            restored,
        })
    }
}
