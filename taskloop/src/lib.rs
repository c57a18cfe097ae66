//! Unattended agent loop over a queue of work items.
//!
//! `taskloop` repeatedly hands an instruction to a coding-agent CLI, reads the
//! agent's merged output, and decides whether the item is done, should be
//! retried, or whether the agent hit its usage limit and the run must wait.
//!
//! - **[`core`]**: Pure, deterministic logic (classification, backoff, queue
//!   selection). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, process execution,
//!   clock). Isolated behind traits so tests can substitute fakes.
//!
//! [`looping`] drives the two together; `main.rs` wires it to the CLI.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
