//! Shared deterministic types for triage core logic.
//!
//! These types define stable contracts between the resolver, the sandbox, the
//! matrix sweep and the bisector. They must not depend on external state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Human-facing name for a toolchain release or moving target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum VersionLabel {
    /// Fixed semantic version such as `1.6.0`.
    Pinned(String),
    /// Moving target such as `devel` or `stable`.
    Floating(String),
}

impl VersionLabel {
    /// Classify a raw label; anything listed in `floating` is a moving target.
    pub fn classify(raw: &str, floating: &[String]) -> Self {
        let name = raw.trim().to_lowercase();
        if floating.iter().any(|f| f.trim().eq_ignore_ascii_case(&name)) {
            VersionLabel::Floating(name)
        } else {
            VersionLabel::Pinned(name)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VersionLabel::Pinned(name) | VersionLabel::Floating(name) => name,
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, VersionLabel::Floating(_))
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short, content-derived identifier of a commit in the toolchain history.
///
/// Ordered only by ancestry; the derived string ordering is meaningless and is
/// deliberately not implemented.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// Parse a hexadecimal commit id, accepting the `#hash` switch syntax and
    /// surrounding quotes. Returns `None` for anything that is not 7-40 hex chars.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_matches(|c| c == '\'' || c == '"');
        let hash = trimmed.strip_prefix('#').unwrap_or(trimmed).to_lowercase();
        let valid_len = (7..=40).contains(&hash.len());
        if valid_len && hash.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hash))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Target spelling understood by the toolchain switch tool.
    pub fn switch_spec(&self) -> String {
        format!("#{}", self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the active toolchain should be switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchTarget<'a> {
    Label(&'a VersionLabel),
    Commit(&'a CommitId),
}

impl SwitchTarget<'_> {
    pub fn spec(&self) -> String {
        match self {
            SwitchTarget::Label(label) => label.as_str().to_string(),
            SwitchTarget::Commit(commit) => commit.switch_spec(),
        }
    }
}

/// Pass/fail result of one sandbox invocation, before the caller adds timing.
///
/// Build failures and behavioural failures are both `ok=false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRun {
    pub ok: bool,
    pub output: String,
}

impl SandboxRun {
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
        }
    }
}

/// Outcome of running one snippet against one version or commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub ok: bool,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub artifact_size_bytes: u64,
}

impl RunOutcome {
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds().max(0)
    }
}

/// Authorship details of the commit blamed for a regression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitMetadata {
    pub author: String,
    pub message: String,
    pub date: String,
    pub changed_files: Vec<String>,
}

/// Terminal state of the commit bisector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BisectResult {
    /// Transition localized. `nearby` is the residual window that was scanned.
    Found {
        commit: CommitId,
        metadata: CommitMetadata,
        nearby: Vec<CommitId>,
    },
    /// No transition could be localized.
    Inconclusive {
        reason: String,
        nearby: Vec<CommitId>,
    },
}
