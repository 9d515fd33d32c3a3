//! Stable exit codes for the engine CLI contract.

/// Contract satisfied and orchestration succeeded.
pub const OK: i32 = 0;
/// Orchestration failed (budget refusal, gate exhaustion, verification error).
pub const FAILED: i32 = 1;
/// Strict mode required a subagent capability that was missing, or the CLI crashed.
pub const CAPABILITY_MISSING: i32 = 2;
/// Run was asleep: engagement contract violated or `forceSleep` set.
pub const ASLEEP: i32 = 5;
