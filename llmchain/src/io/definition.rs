//! Chain definitions stored as `chains/<name>.json`.
//!
//! A definition is produced once (by hand or by a creation wizard) and read
//! by the engine. The engine never writes definitions except through
//! [`save_chain`].

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::shutdown::{DEFAULT_MAX_CONSECUTIVE_BLOCKS, ShutdownLimits};
use crate::core::types::{AfterTrigger, ChainMode, LinkRole};
use crate::io::layout::ChainPaths;
use crate::io::store::validate_name;

/// Errors a caller may want to tell apart when loading definitions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("chain {name} not found at {path}")]
    NotFound { name: String, path: PathBuf },

    #[error("invalid chain {name}:\n- {}", .errors.join("\n- "))]
    Invalid { name: String, errors: Vec<String> },

    #[error("chain {chain} has no prompt {key:?}")]
    MissingPrompt { chain: String, key: String },
}

/// Immutable description of a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainDefinition {
    #[serde(rename = "chain_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub mode: ChainMode,
    /// Round budget; 0 means unbounded.
    #[serde(default)]
    pub max_rounds: u64,
    /// Wall-clock budget in hours; 0 means unbounded.
    #[serde(default)]
    pub runtime_hours: f64,
    #[serde(default = "default_max_consecutive_blocks")]
    pub max_consecutive_blocks: usize,
    /// Text that ends the loop when it appears in the status or handoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_criterion: Option<String>,
    /// ISO date (or datetime) after which the chain stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub links: Vec<LinkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_agent: Option<AgentSpec>,
    #[serde(default)]
    pub prompts: BTreeMap<String, PromptRef>,
}

fn default_max_consecutive_blocks() -> usize {
    DEFAULT_MAX_CONSECUTIVE_BLOCKS
}

/// One link of a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LinkSpec {
    pub name: String,
    #[serde(default)]
    pub role: LinkRole,
    /// Model identifier; the global default model is used when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// Key into [`ChainDefinition::prompts`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Workers only: keep working until capacity is exhausted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub until_full: bool,
    /// Resume the agent's previous conversation in the working directory.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_conversation: bool,
}

/// Agent that runs once after the loop ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentSpec {
    #[serde(flatten)]
    pub link: LinkSpec,
    #[serde(default)]
    pub trigger: AfterTrigger,
}

/// Where a prompt's text lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptRef {
    /// Path relative to the base directory.
    File { path: PathBuf },
}

impl ChainDefinition {
    /// Check semantic rules serde cannot express.
    ///
    /// Returns a list of stable error messages (empty on success).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(err) = validate_name("chain", &self.name) {
            errors.push(err.to_string());
        }
        if self.links.is_empty() {
            errors.push("chain must have at least one link".to_string());
        }
        if !self.runtime_hours.is_finite() || self.runtime_hours < 0.0 {
            errors.push(format!(
                "runtime_hours must be >= 0, got {}",
                self.runtime_hours
            ));
        }
        if self.max_consecutive_blocks == 0 {
            errors.push("max_consecutive_blocks must be >= 1".to_string());
        }
        if let Some(deadline) = &self.deadline
            && let Err(err) = parse_deadline(deadline)
        {
            errors.push(err.to_string());
        }

        let mut seen = HashSet::new();
        let after = self.after_agent.as_ref().map(|agent| &agent.link);
        for link in self.links.iter().chain(after) {
            if let Err(err) = validate_name("link", &link.name) {
                errors.push(err.to_string());
            }
            if !seen.insert(link.name.as_str()) {
                errors.push(format!("duplicate link name '{}'", link.name));
            }
            if let Some(key) = &link.prompt
                && !self.prompts.contains_key(key)
            {
                errors.push(format!(
                    "link '{}' references unknown prompt '{}'",
                    link.name, key
                ));
            }
        }
        errors
    }

    /// Shutdown budgets for this chain.
    pub fn limits(&self) -> Result<ShutdownLimits> {
        let deadline = self.deadline.as_deref().map(parse_deadline).transpose()?;
        Ok(ShutdownLimits {
            max_rounds: self.max_rounds,
            runtime_hours: self.runtime_hours,
            max_consecutive_blocks: self.max_consecutive_blocks,
            deadline,
        })
    }

    /// Read the text of prompt `key` relative to `paths.base`.
    pub fn load_prompt(&self, paths: &ChainPaths, key: &str) -> Result<String> {
        let prompt = self
            .prompts
            .get(key)
            .ok_or_else(|| DefinitionError::MissingPrompt {
                chain: self.name.clone(),
                key: key.to_string(),
            })?;
        match prompt {
            PromptRef::File { path } => {
                let full = paths.base.join(path);
                fs::read_to_string(&full)
                    .with_context(|| format!("read prompt {} ({})", key, full.display()))
            }
        }
    }

    /// Read every prompt referenced by a link or the after-agent, keyed by prompt key.
    pub fn load_link_prompts(&self, paths: &ChainPaths) -> Result<BTreeMap<String, String>> {
        let mut prompts = BTreeMap::new();
        let after = self.after_agent.as_ref().map(|agent| &agent.link);
        for link in self.links.iter().chain(after) {
            if let Some(key) = &link.prompt
                && !prompts.contains_key(key)
            {
                prompts.insert(key.clone(), self.load_prompt(paths, key)?);
            }
        }
        Ok(prompts)
    }
}

/// Parse a deadline given as `YYYY-MM-DD` or an ISO datetime (date part used).
pub fn parse_deadline(raw: &str) -> Result<NaiveDate> {
    let text = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(datetime.date());
    }
    DateTime::parse_from_rfc3339(text)
        .map(|datetime| datetime.date_naive())
        .with_context(|| format!("invalid deadline {raw:?}"))
}

/// Load and validate `chains/<name>.json`.
pub fn load_chain(paths: &ChainPaths, name: &str) -> Result<ChainDefinition> {
    validate_name("chain", name)?;
    let path = paths.chain_path(name);
    debug!(path = %path.display(), "loading chain definition");
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(DefinitionError::NotFound {
                name: name.to_string(),
                path,
            }
            .into());
        }
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let definition: ChainDefinition =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let errors = definition.validate();
    if !errors.is_empty() {
        return Err(DefinitionError::Invalid {
            name: name.to_string(),
            errors,
        }
        .into());
    }
    Ok(definition)
}

/// Validate and atomically write a definition to `chains/<name>.json`.
pub fn save_chain(paths: &ChainPaths, definition: &ChainDefinition) -> Result<PathBuf> {
    let errors = definition.validate();
    if !errors.is_empty() {
        return Err(DefinitionError::Invalid {
            name: definition.name.clone(),
            errors,
        }
        .into());
    }
    let path = paths.chain_path(&definition.name);
    let mut buf = serde_json::to_string_pretty(definition).context("serialize chain")?;
    buf.push('\n');
    write_atomic(&path, &buf)?;
    Ok(path)
}

/// Names of all stored chains, sorted.
pub fn list_chains(paths: &ChainPaths) -> Result<Vec<String>> {
    let entries = match fs::read_dir(&paths.chains_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", paths.chains_dir.display()));
        }
    };
    let mut names = Vec::new();
    for entry in entries {
        let path = entry.context("read chains entry")?.path();
        if path.extension().is_some_and(|ext| ext == "json")
            && let Some(stem) = path.file_stem()
        {
            names.push(stem.to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("chain path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp chain {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace chain {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW_CHAIN: &str = r#"{
    "chain_name": "review-chain",
    "description": "worker plus reviewer",
    "mode": "loop",
    "max_rounds": 20,
    "runtime_hours": 3,
    "max_consecutive_blocks": 4,
    "stop_criterion": "ALL_DONE",
    "links": [
        {"name": "opus-worker", "role": "worker", "model": "claude-opus-4-6",
         "prompt": "shared", "until_full": true, "description": "worker link 1"},
        {"name": "sonnet-reviewer", "role": "reviewer", "model": "claude-sonnet-4-6",
         "prompt": "shared"}
    ],
    "after_agent": {"name": "summary", "role": "worker", "model": "claude-sonnet-4-6",
                    "prompt": "after", "trigger": "all_done"},
    "prompts": {
        "shared": {"type": "file", "path": "prompts/shared.txt"},
        "after": {"type": "file", "path": "prompts/after.txt"}
    },
    "_created": "2025-01-01 10:00",
    "_creator": "chain_creator"
}"#;

    fn write_chain(paths: &ChainPaths, name: &str, contents: &str) {
        fs::create_dir_all(&paths.chains_dir).expect("mkdir");
        fs::write(paths.chain_path(name), contents).expect("write chain");
    }

    #[test]
    fn parses_full_definition_and_ignores_metadata() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        write_chain(&paths, "review-chain", REVIEW_CHAIN);

        let chain = load_chain(&paths, "review-chain").expect("load");
        assert_eq!(chain.mode, ChainMode::Loop);
        assert_eq!(chain.max_rounds, 20);
        assert_eq!(chain.runtime_hours, 3.0);
        assert_eq!(chain.max_consecutive_blocks, 4);
        assert_eq!(chain.links.len(), 2);
        assert!(chain.links[0].until_full);
        assert_eq!(chain.links[1].role, LinkRole::Reviewer);
        let after = chain.after_agent.expect("after agent");
        assert_eq!(after.trigger, AfterTrigger::AllDone);
        assert_eq!(after.link.name, "summary");
    }

    #[test]
    fn minimal_definition_uses_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        write_chain(
            &paths,
            "tiny",
            r#"{"chain_name": "tiny", "mode": "once", "links": [{"name": "w1"}]}"#,
        );
        let chain = load_chain(&paths, "tiny").expect("load");
        assert_eq!(chain.max_consecutive_blocks, 3);
        assert_eq!(chain.max_rounds, 0);
        assert_eq!(chain.links[0].role, LinkRole::Worker);
        assert_eq!(chain.links[0].model, None);
        assert_eq!(chain.limits().expect("limits"), ShutdownLimits::default());
    }

    #[test]
    fn missing_chain_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        let err = load_chain(&paths, "nonexistent-chain-xyz").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DefinitionError>(),
            Some(DefinitionError::NotFound { .. })
        ));
    }

    #[test]
    fn validation_reports_every_problem() {
        let definition = ChainDefinition {
            name: "bad".to_string(),
            description: String::new(),
            mode: ChainMode::Loop,
            max_rounds: 0,
            runtime_hours: -1.0,
            max_consecutive_blocks: 3,
            stop_criterion: None,
            deadline: Some("next tuesday".to_string()),
            links: vec![
                LinkSpec {
                    name: "dup".to_string(),
                    prompt: Some("missing".to_string()),
                    ..LinkSpec::default()
                },
                LinkSpec {
                    name: "dup".to_string(),
                    ..LinkSpec::default()
                },
            ],
            after_agent: None,
            prompts: BTreeMap::new(),
        };
        let errors = definition.validate();
        assert!(errors.iter().any(|e| e.contains("runtime_hours")));
        assert!(errors.iter().any(|e| e.contains("invalid deadline")));
        assert!(errors.iter().any(|e| e.contains("duplicate link name")));
        assert!(errors.iter().any(|e| e.contains("unknown prompt")));
        assert!(!errors.iter().any(|e| e.contains("max_consecutive_blocks")));
    }

    /// A zero block limit is refused when the definition is read.
    #[test]
    fn zero_block_limit_is_rejected_on_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        write_chain(
            &paths,
            "strict",
            r#"{"chain_name": "strict", "mode": "loop", "max_consecutive_blocks": 0, "links": [{"name": "w"}]}"#,
        );
        let err = load_chain(&paths, "strict").unwrap_err();
        assert!(format!("{err:#}").contains("max_consecutive_blocks must be >= 1"));
    }

    #[test]
    fn empty_links_are_rejected_on_save() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        let definition: ChainDefinition =
            serde_json::from_str(r#"{"chain_name": "empty", "mode": "loop", "links": []}"#)
                .expect("parse");
        let err = save_chain(&paths, &definition).unwrap_err();
        assert!(err.to_string().contains("at least one link"));
        assert!(!paths.chain_path("empty").exists());
    }

    #[test]
    fn save_then_load_and_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        let definition: ChainDefinition = serde_json::from_str(
            r#"{"chain_name": "test-save", "mode": "once", "links": [{"name": "w1", "role": "worker"}]}"#,
        )
        .expect("parse");
        save_chain(&paths, &definition).expect("save");
        fs::write(paths.chains_dir.join("notes.txt"), "ignored").expect("write");
        write_chain(&paths, "alpha", r#"{"chain_name": "alpha", "mode": "loop", "links": [{"name": "w"}]}"#);

        let loaded = load_chain(&paths, "test-save").expect("load");
        assert_eq!(loaded, definition);
        assert_eq!(
            list_chains(&paths).expect("list"),
            vec!["alpha".to_string(), "test-save".to_string()]
        );
    }

    #[test]
    fn list_without_chains_dir_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        assert!(list_chains(&paths).expect("list").is_empty());
    }

    #[test]
    fn deadline_accepts_date_and_datetime() {
        let expected = NaiveDate::from_ymd_opt(2025, 12, 31).expect("date");
        assert_eq!(parse_deadline("2025-12-31").expect("date"), expected);
        assert_eq!(parse_deadline("2025-12-31T18:00:00").expect("dt"), expected);
        assert_eq!(
            parse_deadline("2025-12-31T18:00:00+01:00").expect("rfc3339"),
            expected
        );
        assert!(parse_deadline("31.12.2025").is_err());
    }

    #[test]
    fn prompts_resolve_relative_to_base() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ChainPaths::new(temp.path());
        fs::create_dir_all(&paths.prompts_dir).expect("mkdir");
        fs::write(paths.prompts_dir.join("shared.txt"), "Do the work.").expect("write");
        let chain: ChainDefinition = serde_json::from_str(REVIEW_CHAIN).expect("parse");

        assert_eq!(
            chain.load_prompt(&paths, "shared").expect("prompt"),
            "Do the work."
        );
        let err = chain.load_prompt(&paths, "nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DefinitionError>(),
            Some(DefinitionError::MissingPrompt { .. })
        ));
        assert!(chain.load_prompt(&paths, "after").is_err());
        assert!(chain.load_link_prompts(&paths).is_err());

        fs::write(paths.prompts_dir.join("after.txt"), "Summarize.").expect("write");
        let prompts = chain.load_link_prompts(&paths).expect("prompts");
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts["after"], "Summarize.");
    }
}
