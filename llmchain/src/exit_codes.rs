//! Stable exit codes for llmchain CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid definition, config or state, or any other error.
pub const INVALID: i32 = 1;
/// `llmchain status` found that the chain would stop at the next round boundary.
pub const STOPPED: i32 = 2;
