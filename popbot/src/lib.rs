//! Scheduled click-batch bot for page-counter services.
//!
//! The crate drives an external page session (the [`io::actuator::Actuator`])
//! in fixed-delay batches until a ceiling is reached, the session dies, the
//! page flags us, or the process is asked to stop. The architecture keeps the
//! same strict separation throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (ceiling math, outcome
//!   classification, run-state transitions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config file, stats file, the driver
//!   process). Isolated behind traits so tests can script them.
//!
//! Orchestration modules ([`batch`], [`lifecycle`]) coordinate core logic with
//! I/O to implement `popbot run`.

pub mod batch;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod lifecycle;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
