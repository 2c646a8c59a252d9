//! Stable exit codes for conductor CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// `conductor supervise` ended with the goal complete.
pub const COMPLETE: i32 = 0;
/// Command failed, or a supervisor ended without completing its goal.
pub const ERROR: i32 = 1;
/// Invalid layout or configuration.
pub const INVALID: i32 = 2;
