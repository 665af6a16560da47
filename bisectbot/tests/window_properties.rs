//! Property tests for halving, the residual scan and the matrix latches.

use std::collections::BTreeMap;

use proptest::prelude::*;

use bisectbot::bisect::{BisectRequest, Bisector};
use bisectbot::core::matrix::MatrixTally;
use bisectbot::core::types::{BisectResult, VersionLabel};
use bisectbot::core::window::{BisectWindow, ScanOutcome, narrow, scan};
use bisectbot::resolve::Resolver;
use bisectbot::test_support::{FakeWorld, commit, commits};

/// Window length plus a transition point `k` in `0..=n`.
fn window_and_transition() -> impl Strategy<Value = (usize, usize)> {
    (1usize..300).prop_flat_map(|n| (Just(n), 0..=n))
}

fn bisect_monotone(n: usize, k: usize) -> (BisectResult, Vec<String>) {
    let window = commits(n);
    let world = FakeWorld::new().passing_commits(&window[k..]);
    let history = world.history(window);
    let resolver = Resolver::new(
        BTreeMap::from([
            ("good".to_string(), commit(0xfff00)),
            ("bad".to_string(), commit(0xfff01)),
        ]),
        "devel",
    );
    let good = VersionLabel::Pinned("good".to_string());
    let bad = VersionLabel::Pinned("bad".to_string());
    let mut toolchain = world.toolchain();
    let report = Bisector::new(&resolver, 10).bisect(
        BisectRequest {
            good: &good,
            bad: &bad,
            command: "nim c {input}",
            snippet: "echo 1",
        },
        &mut toolchain,
        &history,
        &world.sandbox(),
    );
    (report.result, world.metadata_log())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn halving_strictly_shrinks_and_terminates(
        oracle in prop::collection::vec(any::<bool>(), 1..1000),
        threshold in 3usize..=20,
    ) {
        let n = oracle.len();
        let mut window = BisectWindow::new((0..n).collect::<Vec<usize>>());
        let mut steps = 0;
        while window.len() > threshold {
            let before = window.len();
            let mid = window.midpoint();
            let passes = oracle[window.as_slice()[mid]];
            window.keep(mid, passes);
            prop_assert!(window.len() < before, "window grew or stalled at {}", before);
            prop_assert!(!window.is_empty());
            steps += 1;
            prop_assert!(steps <= n, "halving did not terminate");
        }

        let mut window = BisectWindow::new((0..n).collect::<Vec<usize>>());
        let probes = narrow(&mut window, threshold, |i| oracle[*i]);
        prop_assert!(window.len() <= threshold);
        prop_assert!(probes <= 2 * (usize::BITS - n.leading_zeros()) as usize);
    }

    #[test]
    fn scan_reports_commit_before_first_pass(n in 1usize..200, k in 0usize..200) {
        let k = k.min(n);
        let candidates: Vec<usize> = (0..n).collect();
        let outcome = scan(&candidates, |i| *i >= k);
        if k == n {
            prop_assert_eq!(outcome, ScanOutcome::NoPassing);
        } else {
            prop_assert_eq!(
                outcome,
                ScanOutcome::Transition { breaking: k.saturating_sub(1), first_pass: k }
            );
        }
    }

    #[test]
    fn bisect_blames_last_failing_commit((n, k) in window_and_transition()) {
        let window = commits(n);
        let (result, metadata_log) = bisect_monotone(n, k);
        if k == n {
            let is_inconclusive = matches!(result, BisectResult::Inconclusive { .. });
            prop_assert!(is_inconclusive);
            prop_assert!(metadata_log.is_empty());
        } else {
            let expected = window[k.saturating_sub(1)].clone();
            match result {
                BisectResult::Found { commit, nearby, .. } => {
                    prop_assert_eq!(&commit, &expected);
                    prop_assert!(nearby.len() <= 10);
                    prop_assert_eq!(metadata_log, vec![expected.to_string()]);
                }
                other => prop_assert!(false, "expected found, got {:?}", other),
            }
        }
    }

    #[test]
    fn matrix_latches_are_set_once(outcomes in prop::collection::vec(any::<bool>(), 1..40)) {
        let mut tally = MatrixTally::default();
        let mut seen_works: Option<usize> = None;
        let mut seen_fails: Option<usize> = None;
        for (index, ok) in outcomes.iter().enumerate() {
            tally.record(&index, *ok);
            if let Some(prev) = seen_works {
                prop_assert_eq!(tally.first_works(), Some(&prev));
            }
            if let Some(prev) = seen_fails {
                prop_assert_eq!(tally.first_fails(), Some(&prev));
            }
            seen_works = tally.first_works().copied();
            seen_fails = tally.first_fails().copied();
        }
        prop_assert_eq!(seen_works, outcomes.iter().position(|ok| *ok));
        prop_assert_eq!(seen_fails, outcomes.iter().position(|ok| !*ok));
    }
}

/// The scan blames the first candidate itself when it already passes. This
/// attribution is knowingly off by one.
#[test]
fn first_candidate_passing_is_blamed_itself() {
    let (result, _) = bisect_monotone(6, 0);
    assert!(matches!(result, BisectResult::Found { commit, .. } if commit == commits(6)[0]));
}
