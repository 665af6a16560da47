//! One full triage: matrix sweep, then commit bisection between its endpoints.

use tracing::{info, instrument, warn};

use crate::bisect::{BisectRequest, Bisector};
use crate::core::intake::TriageRequest;
use crate::io::config::TriageConfig;
use crate::io::diagnostics::Diagnostics;
use crate::io::git::SourceHistory;
use crate::io::sandbox::Sandbox;
use crate::io::toolchain::{ActiveToolchain, ToolchainSwitch};
use crate::report::BisectPhase;
use crate::resolve::Resolver;
use crate::sweep::{SweepReport, sweep_matrix};

pub const NO_WORKING_VERSION: &str = "no working version found";
pub const NO_FAILING_VERSION: &str = "no failing version found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageOutcome {
    pub sweep: SweepReport,
    pub bisect: BisectPhase,
}

/// Collaborators for one triage. The toolchain handle is borrowed exclusively
/// for the whole run.
pub struct Triage<'a, S, H, B, D> {
    pub cfg: &'a TriageConfig,
    pub toolchain: &'a mut ActiveToolchain<S>,
    pub history: &'a H,
    pub sandbox: &'a B,
    pub diagnostics: &'a D,
}

impl<S, H, B, D> Triage<'_, S, H, B, D>
where
    S: ToolchainSwitch,
    H: SourceHistory,
    B: Sandbox,
    D: Diagnostics,
{
    #[instrument(skip_all)]
    pub fn run(self, request: &TriageRequest) -> TriageOutcome {
        let labels = self.cfg.matrix_labels();
        let command = request.command.template.as_str();
        let snippet = request.snippet.as_str();
        let sweep = sweep_matrix(
            &labels,
            command,
            snippet,
            self.toolchain,
            self.sandbox,
            self.diagnostics,
        );

        let bisect = match (&sweep.first_works, &sweep.first_fails) {
            (Some(works), Some(fails)) if works != fails => {
                info!(good = %works, bad = %fails, "bisecting between matrix endpoints");
                let resolver = Resolver::from_config(self.cfg);
                let report = Bisector::new(&resolver, self.cfg.bisect.scan_threshold).bisect(
                    BisectRequest {
                        good: works,
                        bad: fails,
                        command,
                        snippet,
                    },
                    self.toolchain,
                    self.history,
                    self.sandbox,
                );
                BisectPhase::from_report(report, &self.cfg.source.commit_url_prefix)
            }
            (None, _) => skipped(NO_WORKING_VERSION),
            (Some(_), _) => skipped(NO_FAILING_VERSION),
        };
        TriageOutcome { sweep, bisect }
    }
}

fn skipped(reason: &str) -> BisectPhase {
    warn!(reason, "skipping bisection");
    BisectPhase::Skipped {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intake::ParsedCommand;
    use crate::test_support::{CannedDiagnostics, FakeWorld};

    fn request() -> TriageRequest {
        TriageRequest {
            command: ParsedCommand {
                template: "nim c --run {input}".to_string(),
                instrumented: false,
            },
            snippet: "echo 1".to_string(),
            auxiliary: Vec::new(),
        }
    }

    fn config(matrix: &[&str]) -> TriageConfig {
        TriageConfig {
            matrix: matrix.iter().map(|name| name.to_string()).collect(),
            ..TriageConfig::default()
        }
    }

    fn run(world: &FakeWorld, cfg: &TriageConfig) -> TriageOutcome {
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new());
        Triage {
            cfg,
            toolchain: &mut toolchain,
            history: &history,
            sandbox: &world.sandbox(),
            diagnostics: &CannedDiagnostics,
        }
        .run(&request())
    }

    #[test]
    fn all_failing_matrix_skips_bisection() {
        let world = FakeWorld::new();
        let outcome = run(&world, &config(&["new", "old"]));
        assert_eq!(
            outcome.bisect,
            BisectPhase::Skipped {
                reason: NO_WORKING_VERSION.to_string()
            }
        );
        assert_eq!(world.switch_log(), vec!["new", "old"]);
    }

    #[test]
    fn all_passing_matrix_skips_bisection() {
        let world = FakeWorld::new().passing(["new", "old"]);
        let outcome = run(&world, &config(&["new", "old"]));
        assert_eq!(
            outcome.bisect,
            BisectPhase::Skipped {
                reason: NO_FAILING_VERSION.to_string()
            }
        );
    }
}
