//! `llmchain` command-line interface.
//!
//! Every command works on a base directory (`--base-dir`, `LLMCHAIN_HOME`, or
//! the current directory) holding `chains/`, `prompts/`, `state/` and `logs/`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use llmchain::core::types::ShutdownDecision;
use llmchain::exit_codes;
use llmchain::io::chain_state::{ChainState, DEFAULT_STOP_REASON};
use llmchain::io::config::{GlobalConfig, load_config, write_config};
use llmchain::io::definition::{list_chains, load_chain};
use llmchain::io::invoker::ClaudeInvoker;
use llmchain::io::layout::{ChainPaths, HOME_ENV};
use llmchain::io::store::{FsStore, StateKey};
use llmchain::logging;
use llmchain::looping::{LoopSettings, RoundReport, run_chain};

#[derive(Parser)]
#[command(
    name = "llmchain",
    version,
    about = "Run chains of LLM agents round after round"
)]
struct Cli {
    /// Base directory with chains/, prompts/, state/ and logs/.
    #[arg(long, global = true, env = HOME_ENV, default_value = ".")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the base directory layout and a default `config.toml`.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// List stored chain definitions.
    List,
    /// Print a chain definition as JSON.
    Show { chain: String },
    /// Show state and whether the chain would stop at the next round boundary.
    Status { chain: String },
    /// Run the chain until a shutdown condition holds.
    Start {
        chain: String,
        /// Reset state before starting.
        #[arg(long)]
        reset: bool,
        /// Working directory for agents (defaults to the current directory).
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Ask a running chain to stop after the current round.
    Stop {
        chain: String,
        #[arg(long, default_value = DEFAULT_STOP_REASON)]
        reason: String,
    },
    /// Return a chain to a fresh READY state.
    Reset { chain: String },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ChainPaths::new(cli.base_dir);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::List => cmd_list(&paths),
        Command::Show { chain } => cmd_show(&paths, &chain),
        Command::Status { chain } => cmd_status(&paths, &chain),
        Command::Start {
            chain,
            reset,
            workdir,
        } => cmd_start(&paths, &chain, reset, workdir),
        Command::Stop { chain, reason } => cmd_stop(&paths, &chain, &reason),
        Command::Reset { chain } => cmd_reset(&paths, &chain),
    }
}

fn open_state(paths: &ChainPaths, chain: &str) -> Result<ChainState<FsStore>> {
    ChainState::open(chain, FsStore::new(&paths.state_dir))
}

fn cmd_init(paths: &ChainPaths, force: bool) -> Result<i32> {
    for dir in [
        &paths.chains_dir,
        &paths.prompts_dir,
        &paths.state_dir,
        &paths.logs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    if force || !paths.config_path.exists() {
        write_config(&paths.config_path, &GlobalConfig::default())?;
        println!("wrote {}", paths.config_path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_list(paths: &ChainPaths) -> Result<i32> {
    for name in list_chains(paths)? {
        println!("{name}");
    }
    Ok(exit_codes::OK)
}

fn cmd_show(paths: &ChainPaths, chain: &str) -> Result<i32> {
    let definition = load_chain(paths, chain)?;
    let json = serde_json::to_string_pretty(&definition).context("serialize chain")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

fn cmd_status(paths: &ChainPaths, chain: &str) -> Result<i32> {
    let definition = load_chain(paths, chain)?;
    let state = open_state(paths, chain)?;
    let decision = state.check_shutdown(&definition.limits()?)?;

    println!("chain: {chain}");
    println!("status: {}", state.get_status()?);
    println!("round: {}", state.get_round()?);
    println!("runtime: {:.2}h", state.get_runtime_hours()?);
    if let Some(reason) = state.get_stop_reason()? {
        println!("stop requested: {reason}");
    }
    match &decision {
        ShutdownDecision::Continue => {
            println!("shutdown: continue");
            Ok(exit_codes::OK)
        }
        ShutdownDecision::Stop(reason) => {
            println!("shutdown: {reason}");
            Ok(exit_codes::STOPPED)
        }
    }
}

fn cmd_start(
    paths: &ChainPaths,
    chain: &str,
    reset: bool,
    workdir: Option<PathBuf>,
) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let definition = load_chain(paths, chain)?;
    let store = FsStore::new(&paths.state_dir);
    let handoff_path = store.path(chain, &StateKey::Handoff);
    let state = ChainState::open(chain, store)?;
    if reset {
        state.reset()?;
    }

    let workdir = match workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let settings = LoopSettings {
        default_model: config.default_model.clone(),
        handoff_path: handoff_path.display().to_string(),
        logs_dir: paths.chain_logs_dir(chain),
        prompts: definition.load_link_prompts(paths)?,
    };
    let invoker = ClaudeInvoker::from_config(&config, workdir);

    let outcome = run_chain(&definition, &state, &invoker, &settings, print_round)?;
    println!(
        "{}: stopped after {} round(s): {}",
        outcome.chain, outcome.rounds_executed, outcome.stop
    );
    if let Some(after) = &outcome.after_agent {
        println!(
            "after-agent {}: {}",
            after.link,
            if after.succeeded() { "ok" } else { "failed" }
        );
    }
    Ok(exit_codes::OK)
}

fn print_round(report: &RoundReport) {
    let links: Vec<String> = report
        .links
        .iter()
        .map(|link| {
            let mark = if link.succeeded() { "ok" } else { "failed" };
            if link.restored {
                format!("{} {mark} (handoff restored)", link.link)
            } else {
                format!("{} {mark}", link.link)
            }
        })
        .collect();
    println!("round {}: {}", report.round, links.join(", "));
}

fn cmd_stop(paths: &ChainPaths, chain: &str, reason: &str) -> Result<i32> {
    load_chain(paths, chain)?;
    open_state(paths, chain)?.request_stop(reason)?;
    println!("{chain}: stop requested ({reason})");
    Ok(exit_codes::OK)
}

fn cmd_reset(paths: &ChainPaths, chain: &str) -> Result<i32> {
    load_chain(paths, chain)?;
    open_state(paths, chain)?.reset()?;
    println!("{chain}: reset");
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stop_defaults_reason() {
        let cli = Cli::parse_from(["llmchain", "stop", "demo"]);
        assert!(matches!(
            cli.command,
            Command::Stop { ref chain, ref reason } if chain == "demo" && reason == "Manual stop"
        ));
    }

    #[test]
    fn parse_start_with_reset_and_base_dir() {
        let cli = Cli::parse_from(["llmchain", "start", "demo", "--reset", "--base-dir", "/work"]);
        assert_eq!(cli.base_dir, PathBuf::from("/work"));
        assert!(matches!(
            cli.command,
            Command::Start {
                reset: true,
                workdir: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["llmchain", "init", "-f"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_status() {
        let cli = Cli::parse_from(["llmchain", "status", "demo"]);
        assert!(matches!(cli.command, Command::Status { ref chain } if chain == "demo"));
    }
}
