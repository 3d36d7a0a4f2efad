//! Test-only helpers: scripted invokers, definition builders and temp base dirs.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::shutdown::DEFAULT_MAX_CONSECUTIVE_BLOCKS;
use crate::core::types::{ChainMode, LinkRole};
use crate::io::config::{GlobalConfig, write_config};
use crate::io::definition::{ChainDefinition, LinkSpec, PromptRef, save_chain};
use crate::io::invoker::{InvokeOutcome, InvokeRequest, Invoker};
use crate::io::layout::ChainPaths;
use crate::io::store::{StateKey, StateStore};
use crate::looping::LoopSettings;

/// What a scripted agent does when invoked.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// New shared handoff content.
    pub handoff: Option<String>,
    /// New chain status.
    pub status: Option<String>,
    /// Report the agent as failed.
    pub fail: bool,
    /// Return an invocation error instead of an outcome.
    pub error: Option<String>,
}

impl ScriptedTurn {
    /// Agent that changes nothing and succeeds.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn handoff(text: impl Into<String>) -> Self {
        Self {
            handoff: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn failure() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Invoker that plays back [`ScriptedTurn`]s against a state store.
pub struct ScriptedInvoker<S> {
    store: S,
    chain: String,
    turns: RefCell<VecDeque<ScriptedTurn>>,
    requests: RefCell<Vec<InvokeRequest>>,
}

impl<S: StateStore> ScriptedInvoker<S> {
    pub fn new(store: S, chain: impl Into<String>, turns: Vec<ScriptedTurn>) -> Self {
        Self {
            store,
            chain: chain.into(),
            turns: RefCell::new(turns.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.borrow().clone()
    }

    pub fn assert_drained(&self) {
        let remaining = self.turns.borrow().len();
        assert_eq!(remaining, 0, "{remaining} scripted turns were never used");
    }
}

impl<S: StateStore> Invoker for ScriptedInvoker<S> {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        self.requests.borrow_mut().push(request.clone());
        let turn = self
            .turns
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted turn left for link {}", request.link))?;

        if let Some(message) = turn.error {
            return Err(anyhow!(message));
        }
        if let Some(handoff) = &turn.handoff {
            self.store.write(&self.chain, &StateKey::Handoff, handoff)?;
        }
        if let Some(status) = &turn.status {
            self.store.write(&self.chain, &StateKey::Status, status)?;
        }
        Ok(InvokeOutcome {
            success: !turn.fail,
            exit_code: Some(if turn.fail { 1 } else { 0 }),
            timed_out: false,
        })
    }
}

/// Worker link with defaults.
pub fn link(name: &str) -> LinkSpec {
    LinkSpec {
        name: name.to_string(),
        role: LinkRole::Worker,
        ..LinkSpec::default()
    }
}

/// Unbounded loop chain with the given links.
pub fn definition(name: &str, links: Vec<LinkSpec>) -> ChainDefinition {
    ChainDefinition {
        name: name.to_string(),
        description: String::new(),
        mode: ChainMode::Loop,
        max_rounds: 0,
        runtime_hours: 0.0,
        max_consecutive_blocks: DEFAULT_MAX_CONSECUTIVE_BLOCKS,
        stop_criterion: None,
        deadline: None,
        links,
        after_agent: None,
        prompts: BTreeMap::new(),
    }
}

/// Loop settings with no prompts and a throwaway log directory.
pub fn settings() -> LoopSettings {
    LoopSettings {
        default_model: "claude-sonnet-4-6".to_string(),
        handoff_path: "state/demo/handoff.md".to_string(),
        logs_dir: PathBuf::from("logs/demo"),
        prompts: BTreeMap::new(),
    }
}

/// Temporary base directory with the canonical layout.
pub struct TempBase {
    _temp: TempDir,
    paths: ChainPaths,
}

impl TempBase {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = ChainPaths::new(temp.path());
        Ok(Self { _temp: temp, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.base
    }

    pub fn paths(&self) -> &ChainPaths {
        &self.paths
    }

    /// Write `prompts/<key>.txt` and register it on `definition`.
    pub fn add_prompt(&self, definition: &mut ChainDefinition, key: &str, text: &str) -> Result<()> {
        fs::create_dir_all(&self.paths.prompts_dir).context("create prompts dir")?;
        let relative = PathBuf::from("prompts").join(format!("{key}.txt"));
        fs::write(self.paths.base.join(&relative), text)
            .with_context(|| format!("write prompt {key}"))?;
        definition
            .prompts
            .insert(key.to_string(), PromptRef::File { path: relative });
        Ok(())
    }

    pub fn save_chain(&self, definition: &ChainDefinition) -> Result<PathBuf> {
        save_chain(&self.paths, definition)
    }

    /// Write `config.toml` for this base.
    pub fn write_config(&self, config: &GlobalConfig) -> Result<()> {
        write_config(&self.paths.config_path, config)
    }
}
