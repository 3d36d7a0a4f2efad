//! Long-running chains of LLM agent invocations.
//!
//! A chain is a fixed sequence of links (agent invocations) that run round
//! after round, sharing a handoff document, until a shutdown condition holds.
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (shutdown evaluation, skip detection,
//!   the round phase machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (state storage, definitions, config,
//!   process execution). Isolated behind traits to enable fakes in tests.
//!
//! [`looping`] coordinates the two to implement `llmchain start`.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
