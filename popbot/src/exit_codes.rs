//! Stable exit codes for popbot CLI commands.

/// Graceful stop: ceiling reached, signal received, session closed or blocked.
pub const OK: i32 = 0;
/// Invalid config, failed setup, or an unrecovered failure during the run.
pub const FATAL: i32 = 1;
