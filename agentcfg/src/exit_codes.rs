//! Stable exit codes for agentcfg CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, settings, or an unknown service id.
pub const INVALID: i32 = 1;
/// A mutation failed (filesystem, transform, or template error).
pub const MUTATION_FAILED: i32 = 2;
/// A prerequisite check or install step failed.
pub const PREREQUISITE_FAILED: i32 = 3;
