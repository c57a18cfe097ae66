//! I/O helpers for the run loop.

pub mod clock;
pub mod config;
pub mod executor;
pub mod paths;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod run_log;
pub mod work_queue;
