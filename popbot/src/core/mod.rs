//! Deterministic, pure logic shared by the bot.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod ceiling;
pub mod classifier;
pub mod run_state;
pub mod types;
