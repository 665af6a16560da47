//! Commit bisection between a known-good and a known-bad label.
//!
//! Init resolves both endpoints, the range is listed newest first, halving
//! narrows it to at most `scan_threshold` commits, and a linear scan blames the
//! commit just before the first pass. A probe that cannot switch or build
//! counts as failing.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{BisectResult, CommitId, SwitchTarget, VersionLabel};
use crate::core::window::{BisectWindow, ScanOutcome, narrow, scan};
use crate::io::git::SourceHistory;
use crate::io::sandbox::Sandbox;
use crate::io::toolchain::{ActiveToolchain, ToolchainSwitch};
use crate::resolve::Resolver;

pub const NO_DISTINCT_ENDPOINTS: &str = "no distinct endpoints";

/// Inputs of one bisection.
#[derive(Debug, Clone, Copy)]
pub struct BisectRequest<'a> {
    pub good: &'a VersionLabel,
    pub bad: &'a VersionLabel,
    pub command: &'a str,
    pub snippet: &'a str,
}

/// Result plus bookkeeping for the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BisectReport {
    pub result: BisectResult,
    pub good_commit: Option<CommitId>,
    pub bad_commit: Option<CommitId>,
    /// Commits in the enumerated range.
    pub commits_considered: usize,
    /// Switch-and-run probes spent, halving and scan together.
    pub probes: usize,
}

impl BisectReport {
    fn inconclusive(reason: impl Into<String>) -> Self {
        Self {
            result: BisectResult::Inconclusive {
                reason: reason.into(),
                nearby: Vec::new(),
            },
            good_commit: None,
            bad_commit: None,
            commits_considered: 0,
            probes: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bisector<'a> {
    resolver: &'a Resolver,
    scan_threshold: usize,
}

impl<'a> Bisector<'a> {
    pub fn new(resolver: &'a Resolver, scan_threshold: usize) -> Self {
        Self {
            resolver,
            scan_threshold,
        }
    }

    #[instrument(skip_all, fields(good = %request.good, bad = %request.bad))]
    pub fn bisect<S, H, B>(
        &self,
        request: BisectRequest<'_>,
        toolchain: &mut ActiveToolchain<S>,
        history: &H,
        sandbox: &B,
    ) -> BisectReport
    where
        S: ToolchainSwitch,
        H: SourceHistory,
        B: Sandbox,
    {
        let good = self.resolver.resolve(request.good, toolchain, history);
        let bad = self.resolver.resolve(request.bad, toolchain, history);
        let (good, bad) = match (good, bad) {
            (Ok(good), Ok(bad)) if good != bad => (good, bad),
            (Ok(commit), Ok(_)) => {
                warn!(commit = %commit, "both endpoints resolve to the same commit");
                return BisectReport::inconclusive(NO_DISTINCT_ENDPOINTS);
            }
            (good, bad) => {
                for err in [good.err(), bad.err()].into_iter().flatten() {
                    warn!(err = %err, "endpoint resolution failed");
                }
                return BisectReport::inconclusive(NO_DISTINCT_ENDPOINTS);
            }
        };

        let mut report = BisectReport {
            good_commit: Some(good.clone()),
            bad_commit: Some(bad.clone()),
            ..BisectReport::inconclusive("")
        };
        let candidates = match history.commits_between(&good, &bad) {
            Ok(candidates) if !candidates.is_empty() => candidates,
            Ok(_) => {
                let reason = format!("no commits between {good} and {bad}");
                report.result = inconclusive(reason, Vec::new());
                return report;
            }
            Err(err) => {
                warn!(err = %err, "could not list commits");
                let reason = format!("could not list commits: {err:#}");
                report.result = inconclusive(reason, Vec::new());
                return report;
            }
        };
        report.commits_considered = candidates.len();
        info!(commits = candidates.len(), "bisecting");

        let mut window = BisectWindow::new(candidates);
        let mut check = |commit: &CommitId| probe(toolchain, sandbox, commit, request);
        report.probes = narrow(&mut window, self.scan_threshold, &mut check);
        let nearby = window.into_vec();
        debug!(window = nearby.len(), probes = report.probes, "halving finished");

        let mut scanned = 0;
        let outcome = scan(&nearby, |commit| {
            scanned += 1;
            check(commit)
        });
        report.probes += scanned;

        report.result = match outcome {
            ScanOutcome::Transition {
                breaking,
                first_pass,
            } => {
                let commit = nearby[breaking].clone();
                info!(commit = %commit, first_pass = %nearby[first_pass], "regression localized");
                let metadata = history.metadata_of(&commit).unwrap_or_else(|err| {
                    warn!(commit = %commit, err = %err, "could not read commit metadata");
                    Default::default()
                });
                BisectResult::Found {
                    commit,
                    metadata,
                    nearby,
                }
            }
            ScanOutcome::NoPassing => {
                warn!(window = nearby.len(), "no passing commit in residual window");
                inconclusive("no passing commit in the residual window", nearby)
            }
        };
        report
    }
}

/// Switch to `commit` and run the snippet. Any failure along the way is a fail.
fn probe<S, B>(
    toolchain: &mut ActiveToolchain<S>,
    sandbox: &B,
    commit: &CommitId,
    request: BisectRequest<'_>,
) -> bool
where
    S: ToolchainSwitch,
    B: Sandbox,
{
    if let Err(err) = toolchain.switch_to(SwitchTarget::Commit(commit)) {
        warn!(commit = %commit, err = %err, "probe switch failed; counting as failure");
        return false;
    }
    let run = sandbox.run(request.command, request.snippet);
    debug!(commit = %commit, ok = run.ok, "probed");
    run.ok
}

fn inconclusive(reason: impl Into<String>, nearby: Vec<CommitId>) -> BisectResult {
    BisectResult::Inconclusive {
        reason: reason.into(),
        nearby,
    }
}
