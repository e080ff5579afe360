//! I/O helpers for popbot commands.

pub mod actuator;
pub mod config;
pub mod driver;
pub mod stats_store;
