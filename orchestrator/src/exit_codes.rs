//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, unknown task, busy key, or config error.
pub const INVALID: i32 = 1;
/// Worker spawned but failed, or produced no parseable result.
pub const WORKER_FAILED: i32 = 2;
/// Worker exceeded its wall-clock budget and was terminated.
pub const TIMEOUT: i32 = 3;
