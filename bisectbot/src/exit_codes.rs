//! Stable exit codes for bisectbot CLI commands.

/// Command succeeded; for `triage`, the breaking commit was found.
pub const OK: i32 = 0;
/// Invalid config or request, unauthorized requester, or any other error.
pub const INVALID: i32 = 1;
/// `bisectbot triage` bisected but could not localize a commit.
pub const INCONCLUSIVE: i32 = 2;
/// `bisectbot triage` finished the matrix but skipped bisection.
pub const SKIPPED: i32 = 3;
