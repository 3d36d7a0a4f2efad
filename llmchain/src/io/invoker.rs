//! Invocation abstraction for running one link's agent.
//!
//! The [`Invoker`] trait decouples the round loop from the agent backend
//! (currently the `claude` CLI). Tests use scripted invokers that edit the
//! handoff directly without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::LinkRole;
use crate::io::config::GlobalConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for a single link invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub chain: String,
    pub link: String,
    pub role: LinkRole,
    pub model: String,
    /// Fully rendered prompt text.
    pub prompt: String,
    /// 1-based round the invocation belongs to.
    pub round: u64,
    /// Pass `--continue` so the agent resumes its last session.
    pub continue_conversation: bool,
    /// Where stdout/stderr of the agent are written.
    pub log_path: PathBuf,
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Abstraction over agent backends.
///
/// `Err` means the agent could not be run at all; an agent that ran and
/// failed is reported through [`InvokeOutcome::success`].
pub trait Invoker {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome>;
}

impl<I: Invoker + ?Sized> Invoker for &I {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        (**self).invoke(request)
    }
}

/// Invoker that spawns `claude -p`.
#[derive(Debug, Clone)]
pub struct ClaudeInvoker {
    program: String,
    workdir: PathBuf,
    fallback_model: Option<String>,
    permission_mode: Option<String>,
    allowed_tools: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ClaudeInvoker {
    pub fn from_config(config: &GlobalConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: "claude".to_string(),
            workdir: workdir.into(),
            fallback_model: config.fallback_model.clone(),
            permission_mode: Some(config.default_permission_mode.clone())
                .filter(|mode| !mode.trim().is_empty()),
            allowed_tools: config.default_allowed_tools.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Use a different executable (for wrappers or tests).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Build the child command without running it.
    pub fn build_command(&self, request: &InvokeRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--model")
            .arg(&request.model);
        if request.continue_conversation {
            cmd.arg("--continue");
        }
        if let Some(fallback) = &self.fallback_model
            && fallback != &request.model
        {
            cmd.arg("--fallback-model").arg(fallback);
        }
        if let Some(mode) = &self.permission_mode {
            cmd.arg("--permission-mode").arg(mode);
        }
        if !self.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").args(&self.allowed_tools);
        }
        // A nested agent refuses to start while this marker is inherited.
        cmd.env_remove("CLAUDECODE")
            .env("PYTHONIOENCODING", "utf-8")
            .current_dir(&self.workdir);
        cmd
    }
}

impl Invoker for ClaudeInvoker {
    #[instrument(skip_all, fields(chain = %request.chain, link = %request.link, round = request.round))]
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeOutcome> {
        info!(model = %request.model, role = request.role.as_str(), "starting agent");
        let cmd = self.build_command(request);
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {} for link {}", self.program, request.link))?;

        write_invocation_log(&request.log_path, request, &output)?;

        let outcome = InvokeOutcome {
            success: output.success(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        };
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
        } else if !outcome.success {
            warn!(exit_code = ?outcome.exit_code, "agent failed");
        } else {
            debug!("agent completed");
        }
        Ok(outcome)
    }
}

fn write_invocation_log(path: &Path, request: &InvokeRequest, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut buf = format!(
        "chain: {}\nlink: {} ({})\nmodel: {}\nround: {}\nexit: {:?}\n",
        request.chain,
        request.link,
        request.role.as_str(),
        request.model,
        request.round,
        output.status.code()
    );
    buf.push_str("\n=== stdout ===\n");
    buf.push_str(&output.stdout.text());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr.text());
    buf.push_str(&output.truncated_notice("agent"));
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write invocation log {}", path.display()))
}
