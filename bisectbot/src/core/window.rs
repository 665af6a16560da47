//! Interval halving and residual scan over an ordered commit window.
//!
//! The window is ordered the way `git log good..bad` lists commits: the known-bad
//! end first, walking back toward the known-good end. Failing commits therefore
//! precede passing ones.

/// Smallest residual size halving may stop at. Below this the "keep the passing
/// midpoint" branch could fail to shrink the window.
pub const MIN_SCAN_THRESHOLD: usize = 3;

/// Contiguous, monotonically shrinking view over an ordered candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BisectWindow<T> {
    items: Vec<T>,
    start: usize,
    end: usize,
}

impl<T> BisectWindow<T> {
    pub fn new(items: Vec<T>) -> Self {
        let end = items.len();
        Self {
            items,
            start: 0,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items[self.start..self.end]
    }

    /// Probe position relative to the window start: `ceil(len / 2)`.
    pub fn midpoint(&self) -> usize {
        self.len().div_ceil(2)
    }

    /// Narrow around a probed midpoint.
    ///
    /// A passing midpoint means the regression is newer, so `[start, mid]` is
    /// kept; a failing one keeps `[mid, end)`. The probed commit stays in the
    /// window either way so the fail/pass boundary pair is never split.
    pub fn keep(&mut self, mid: usize, passes: bool) {
        let mid = mid.min(self.len().saturating_sub(1));
        if passes {
            self.end = self.start + mid + 1;
        } else {
            self.start += mid;
        }
    }

    pub fn into_vec(mut self) -> Vec<T> {
        self.items.truncate(self.end);
        self.items.drain(..self.start);
        self.items
    }
}

/// Halve the window until it holds at most `threshold` candidates.
///
/// `probe` returns true when the candidate passes. Returns the number of probes.
pub fn narrow<T, F>(window: &mut BisectWindow<T>, threshold: usize, mut probe: F) -> usize
where
    F: FnMut(&T) -> bool,
{
    let threshold = threshold.max(MIN_SCAN_THRESHOLD);
    let mut probes = 0;
    while window.len() > threshold {
        let mid = window.midpoint();
        let passes = probe(&window.as_slice()[mid]);
        probes += 1;
        window.keep(mid, passes);
    }
    probes
}

/// Result of walking the residual window front to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// `breaking` is the blamed position, `first_pass` where the first pass was seen.
    Transition { breaking: usize, first_pass: usize },
    /// Every candidate failed.
    NoPassing,
}

/// Walk candidates in order and stop at the first that passes.
///
/// The commit before the first pass is blamed. When the very first candidate
/// passes it is blamed itself; this attribution is knowingly off by one in that
/// case.
pub fn scan<T, F>(candidates: &[T], mut probe: F) -> ScanOutcome
where
    F: FnMut(&T) -> bool,
{
    for (index, candidate) in candidates.iter().enumerate() {
        if probe(candidate) {
            return ScanOutcome::Transition {
                breaking: index.saturating_sub(1),
                first_pass: index,
            };
        }
    }
    ScanOutcome::NoPassing
}
