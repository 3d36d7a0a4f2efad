//! I/O for chain state, definitions, configuration and agent invocation.

pub mod chain_state;
pub mod config;
pub mod definition;
pub mod invoker;
pub mod layout;
pub mod process;
pub mod prompt;
pub mod store;
