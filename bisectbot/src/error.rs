//! Domain error taxonomy.
//!
//! Plumbing failures (files, spawning processes) stay `anyhow::Error`. These
//! enums cover the cases callers branch on. A failing build or run is never an
//! error: it is a `SandboxRun` with `ok = false`.

use thiserror::Error;

/// A version label could not be mapped to a commit id.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("empty version label")]
    EmptyLabel,
    #[error("could not switch toolchain to '{label}': {source}")]
    Switch {
        label: String,
        #[source]
        source: SwitchError,
    },
    #[error("toolchain built from '{label}' did not report a commit id")]
    MissingBuildCommit { label: String },
    #[error("release tag for '{label}' could not be resolved: {reason}")]
    Tag { label: String, reason: String },
}

/// The toolchain switch primitive failed on every attempt.
#[derive(Debug, Error)]
#[error("switch to '{target}' failed after {attempts} attempts: {last_error}")]
pub struct SwitchError {
    pub target: String,
    pub attempts: u32,
    pub last_error: String,
}

/// A request body was rejected before reaching the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    #[error("request has no command line")]
    EmptyCommand,
    #[error("command must not contain '{0}'")]
    BannedShellToken(String),
    #[error("command must start with '!nim c', '!nim cpp' or '!nim js', got '{0}'")]
    UnsupportedCommand(String),
    #[error("request has no ```nim code block")]
    MissingSnippet,
    #[error("requester is not allowed to trigger a triage")]
    Unauthorized,
}
