//! Deterministic, pure logic shared by the chain engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! snapshots and return deterministic outputs suitable for tests.

pub mod machine;
pub mod shutdown;
pub mod skip;
pub mod types;
