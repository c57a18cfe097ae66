//! Stable exit codes for taskloop commands.

/// Run finished: queue exhausted, item cap reached, or no work remaining.
pub const OK: i32 = 0;
/// Invalid config, missing queue or project, missing agent executable, or other errors.
pub const INVALID: i32 = 1;
/// An item used up its attempts and the run was halted.
pub const EXHAUSTED: i32 = 2;
