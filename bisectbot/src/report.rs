//! Triage report: plain serializable data with markdown and JSON renderings.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::bisect::BisectReport;
use crate::core::types::{BisectResult, CommitId, CommitMetadata, VersionLabel};
use crate::exit_codes;
use crate::io::diagnostics::ToolVersion;
use crate::sweep::{SweepReport, VersionReport};

const REPORT_TEMPLATE: &str = include_str!("templates/report.md");
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// What the bisection phase ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BisectPhase {
    Found {
        commit: CommitId,
        commit_url: String,
        metadata: CommitMetadata,
        nearby: Vec<CommitId>,
        commits_considered: usize,
    },
    Inconclusive {
        reason: String,
        nearby: Vec<CommitId>,
        commits_considered: usize,
    },
    /// Bisection never started, e.g. no passing version in the matrix.
    Skipped { reason: String },
}

impl BisectPhase {
    pub fn from_report(report: BisectReport, commit_url_prefix: &str) -> Self {
        let commits_considered = report.commits_considered;
        match report.result {
            BisectResult::Found {
                commit,
                metadata,
                nearby,
            } => BisectPhase::Found {
                commit_url: commit_url(commit_url_prefix, &commit),
                commit,
                metadata,
                nearby,
                commits_considered,
            },
            BisectResult::Inconclusive { reason, nearby } => BisectPhase::Inconclusive {
                reason,
                nearby,
                commits_considered,
            },
        }
    }

    pub fn commits_considered(&self) -> usize {
        match self {
            BisectPhase::Found {
                commits_considered, ..
            }
            | BisectPhase::Inconclusive {
                commits_considered, ..
            } => *commits_considered,
            BisectPhase::Skipped { .. } => 0,
        }
    }

    pub fn nearby(&self) -> &[CommitId] {
        match self {
            BisectPhase::Found { nearby, .. } | BisectPhase::Inconclusive { nearby, .. } => nearby,
            BisectPhase::Skipped { .. } => &[],
        }
    }

    /// One-line, human-readable explanation of the terminal state.
    pub fn explanation(&self) -> String {
        match self {
            BisectPhase::Found {
                commit, metadata, ..
            } => format!("regression introduced by {commit} ({})", metadata.author),
            BisectPhase::Inconclusive { reason, .. } => format!("bisection inconclusive: {reason}"),
            BisectPhase::Skipped { reason } => format!("bisection skipped: {reason}"),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            BisectPhase::Found { .. } => exit_codes::OK,
            BisectPhase::Inconclusive { .. } => exit_codes::INCONCLUSIVE,
            BisectPhase::Skipped { .. } => exit_codes::SKIPPED,
        }
    }
}

/// Everything one triage produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriageReport {
    pub platform: String,
    pub requester: Option<String>,
    pub association: Option<String>,
    pub command: String,
    pub first_works: Option<VersionLabel>,
    pub first_fails: Option<VersionLabel>,
    pub versions: Vec<VersionReport>,
    pub bisect: BisectPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub host_tools: Vec<ToolVersion>,
    pub commit_url_prefix: String,
}

#[derive(Debug, Serialize)]
struct VersionView<'a> {
    label: &'a str,
    ok: bool,
    output: &'a str,
    intermediate: &'a str,
    ast_dump: &'a str,
    size: String,
    started: String,
    finished: String,
    duration: String,
}

#[derive(Debug, Serialize)]
struct CommitView<'a> {
    id: &'a str,
    url: String,
}

impl TriageReport {
    /// Matrix entries plus commits enumerated by the bisector.
    pub fn commits_considered(&self) -> usize {
        self.versions.len() + self.bisect.commits_considered()
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds().max(0)
    }

    pub fn exit_code(&self) -> i32 {
        self.bisect.exit_code()
    }

    pub fn render_json(&self) -> Result<String> {
        let mut payload = serde_json::to_string_pretty(self).context("serialize report json")?;
        payload.push('\n');
        Ok(payload)
    }

    pub fn render_markdown(&self) -> Result<String> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("report.md", REPORT_TEMPLATE)
            .context("load report template")?;
        let template = env.get_template("report.md")?;

        let versions: Vec<VersionView<'_>> = self
            .versions
            .iter()
            .map(|v| VersionView {
                label: v.label.as_str(),
                ok: v.outcome.ok,
                output: v.outcome.output.trim(),
                intermediate: v.intermediate.trim(),
                ast_dump: v.ast_dump.trim(),
                size: format_size(v.outcome.artifact_size_bytes),
                started: v.outcome.started_at.format(TIMESTAMP_FORMAT).to_string(),
                finished: v.outcome.finished_at.format(TIMESTAMP_FORMAT).to_string(),
                duration: format_duration(v.outcome.duration_secs()),
            })
            .collect();
        let nearby: Vec<CommitView<'_>> = self
            .bisect
            .nearby()
            .iter()
            .map(|commit| CommitView {
                id: commit.as_str(),
                url: commit_url(&self.commit_url_prefix, commit),
            })
            .collect();
        let duration = self.duration_secs();
        let commits_considered = self.commits_considered();
        let rate = (duration > 0).then(|| commits_considered as i64 / duration);
        let summary = match &self.bisect {
            BisectPhase::Found { .. } => "Bug found",
            BisectPhase::Inconclusive { .. } => "Bisection inconclusive",
            BisectPhase::Skipped { .. } => "Matrix finished",
        };

        let rendered = template
            .render(context! {
                platform => self.platform,
                requester => self.requester,
                association => self.association,
                versions => versions,
                bisect => self.bisect,
                nearby => nearby,
                host_tools => self.host_tools,
                started => self.started_at.format(TIMESTAMP_FORMAT).to_string(),
                command => self.command,
                summary => summary,
                duration => format_duration(duration),
                commits_considered => commits_considered,
                rate => rate.filter(|r| *r > 0),
            })
            .context("render report")?;
        Ok(rendered)
    }
}

/// Assemble a report from the sweep and the bisection phase.
pub struct ReportParts {
    pub requester: Option<String>,
    pub association: Option<String>,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub host_tools: Vec<ToolVersion>,
    pub commit_url_prefix: String,
}

impl ReportParts {
    pub fn finish(self, sweep: SweepReport, bisect: BisectPhase) -> TriageReport {
        TriageReport {
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            requester: self.requester,
            association: self.association,
            command: self.command,
            first_works: sweep.first_works,
            first_fails: sweep.first_fails,
            versions: sweep.versions,
            bisect,
            started_at: self.started_at,
            finished_at: Utc::now(),
            host_tools: self.host_tools,
            commit_url_prefix: self.commit_url_prefix,
        }
    }
}

pub fn commit_url(prefix: &str, commit: &CommitId) -> String {
    format!("{prefix}{commit}")
}

/// Human duration such as `1 hour 2 minutes 3 seconds`; `now` for zero.
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "now".to_string();
    }
    let parts = [
        (seconds / 3600, "hour"),
        (seconds % 3600 / 60, "minute"),
        (seconds % 60, "second"),
    ];
    parts
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, unit)| {
            let plural = if *count == 1 { "" } else { "s" };
            format!("{count} {unit}{plural}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Size with a binary unit and the exact byte count, e.g. `1.50 Kb (1,536 bytes)`.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    let human = match bytes {
        b if b >= GB => format!("{:.2} Gb", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} Mb", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} Kb", b as f64 / KB as f64),
        1 => "1 byte".to_string(),
        b => format!("{b} bytes"),
    };
    format!("{human} ({} bytes)", group_thousands(bytes))
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
