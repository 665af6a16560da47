//! Version matrix sweep.
//!
//! Every label is switched to and run exactly once, front to back. The first
//! passing and first failing labels are latched in iteration order.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::matrix::MatrixTally;
use crate::core::types::{RunOutcome, SwitchTarget, VersionLabel};
use crate::io::diagnostics::Diagnostics;
use crate::io::sandbox::Sandbox;
use crate::io::toolchain::{ActiveToolchain, ToolchainSwitch};

/// Outcome and diagnostics for one matrix label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionReport {
    pub label: VersionLabel,
    pub outcome: RunOutcome,
    /// Cleaned intermediate code, empty when unavailable.
    pub intermediate: String,
    /// Syntax tree dump, only produced for failing labels.
    pub ast_dump: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub first_works: Option<VersionLabel>,
    pub first_fails: Option<VersionLabel>,
    pub versions: Vec<VersionReport>,
}

impl SweepReport {
    /// Both endpoints, when the matrix saw a pass and a failure.
    pub fn endpoints(&self) -> Option<(&VersionLabel, &VersionLabel)> {
        Some((self.first_works.as_ref()?, self.first_fails.as_ref()?))
    }
}

/// Run the snippet on every label in `labels`, in order.
#[instrument(skip_all, fields(labels = labels.len()))]
pub fn sweep_matrix<S, B, D>(
    labels: &[VersionLabel],
    command: &str,
    snippet: &str,
    toolchain: &mut ActiveToolchain<S>,
    sandbox: &B,
    diagnostics: &D,
) -> SweepReport
where
    S: ToolchainSwitch,
    B: Sandbox,
    D: Diagnostics,
{
    let mut tally = MatrixTally::default();
    let mut versions = Vec::with_capacity(labels.len());
    for label in labels {
        let report = match toolchain.switch_to(SwitchTarget::Label(label)) {
            Ok(()) => {
                let outcome = timed_run(sandbox, command, snippet);
                let ast_dump = if outcome.ok {
                    String::new()
                } else {
                    diagnostics.ast_dump(snippet)
                };
                VersionReport {
                    label: label.clone(),
                    intermediate: diagnostics.intermediate(),
                    ast_dump,
                    outcome,
                }
            }
            Err(err) => {
                warn!(label = %label, err = %err, "switch failed; counting as failure");
                let now = Utc::now();
                VersionReport {
                    label: label.clone(),
                    outcome: RunOutcome {
                        ok: false,
                        output: err.to_string(),
                        started_at: now,
                        finished_at: now,
                        artifact_size_bytes: 0,
                    },
                    intermediate: String::new(),
                    ast_dump: String::new(),
                }
            }
        };
        info!(label = %label, ok = report.outcome.ok, "matrix entry finished");
        tally.record(label, report.outcome.ok);
        versions.push(report);
    }
    let (first_works, first_fails) = tally.into_parts();
    SweepReport {
        first_works,
        first_fails,
        versions,
    }
}

/// Run the sandbox with timestamps around it and stat the output artifact.
pub fn timed_run<B: Sandbox>(sandbox: &B, command: &str, snippet: &str) -> RunOutcome {
    let started_at = Utc::now();
    let run = sandbox.run(command, snippet);
    let finished_at = Utc::now();
    RunOutcome {
        ok: run.ok,
        output: run.output,
        started_at,
        finished_at,
        artifact_size_bytes: sandbox.artifact_size(),
    }
}
