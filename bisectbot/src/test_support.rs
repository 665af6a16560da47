//! Test-only doubles for the toolchain switch, sandbox and source history.
//!
//! All doubles share one [`FakeWorld`] so the sandbox oracle can see which
//! target the switch last activated, mirroring the process-wide toolchain.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::types::{CommitId, CommitMetadata, SandboxRun};
use crate::io::diagnostics::Diagnostics;
use crate::io::git::SourceHistory;
use crate::io::sandbox::Sandbox;
use crate::io::toolchain::{ActiveToolchain, RetryPolicy, ToolchainSwitch};

/// Deterministic commit id for position `index` of a synthetic history.
pub fn commit(index: usize) -> CommitId {
    CommitId::parse(&format!("c{index:06x}")).unwrap_or_else(|| panic!("bad commit {index}"))
}

/// `count` synthetic commits, index 0 first.
pub fn commits(count: usize) -> Vec<CommitId> {
    (0..count).map(commit).collect()
}

#[derive(Debug, Default)]
struct WorldState {
    active: Option<String>,
    passing: BTreeSet<String>,
    refused: BTreeSet<String>,
    build_commits: BTreeMap<String, String>,
    switch_log: Vec<String>,
    run_log: Vec<String>,
    metadata_log: Vec<String>,
    checkout_log: Vec<String>,
    range_log: Vec<String>,
}

/// Shared scripted state behind every fake.
#[derive(Debug, Clone, Default)]
pub struct FakeWorld {
    state: Rc<RefCell<WorldState>>,
}

impl FakeWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets (labels or `#commit` specs) on which the snippet passes.
    pub fn passing<I, S>(self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .borrow_mut()
            .passing
            .extend(targets.into_iter().map(Into::into));
        self
    }

    /// Commits on which the snippet passes.
    pub fn passing_commits<'a>(self, commits: impl IntoIterator<Item = &'a CommitId>) -> Self {
        let specs: Vec<String> = commits.into_iter().map(CommitId::switch_spec).collect();
        self.passing(specs)
    }

    /// Switching to `target` always fails.
    pub fn refusing(self, target: &str) -> Self {
        self.state.borrow_mut().refused.insert(target.to_string());
        self
    }

    /// Build metadata reports `commit` while `target` is active.
    pub fn reporting(self, target: &str, commit: &str) -> Self {
        self.state
            .borrow_mut()
            .build_commits
            .insert(target.to_string(), commit.to_string());
        self
    }

    pub fn switch(&self) -> FakeSwitch {
        FakeSwitch {
            world: self.clone(),
        }
    }

    pub fn toolchain(&self) -> ActiveToolchain<FakeSwitch> {
        ActiveToolchain::new(self.switch(), RetryPolicy::new(3), "git hash:")
    }

    pub fn sandbox(&self) -> OracleSandbox {
        OracleSandbox {
            world: self.clone(),
        }
    }

    pub fn history(&self, commits: Vec<CommitId>) -> FakeHistory {
        FakeHistory {
            world: self.clone(),
            commits,
            tags: BTreeMap::new(),
            branch: RefCell::new(Some("devel".to_string())),
            head: RefCell::new(None),
        }
    }

    pub fn active(&self) -> Option<String> {
        self.state.borrow().active.clone()
    }

    /// Every switch primitive invocation, retries included.
    pub fn switch_log(&self) -> Vec<String> {
        self.state.borrow().switch_log.clone()
    }

    /// Active target at each sandbox run.
    pub fn run_log(&self) -> Vec<String> {
        self.state.borrow().run_log.clone()
    }

    pub fn metadata_log(&self) -> Vec<String> {
        self.state.borrow().metadata_log.clone()
    }

    pub fn checkout_log(&self) -> Vec<String> {
        self.state.borrow().checkout_log.clone()
    }

    /// `good..bad` ranges the bisector asked for.
    pub fn range_log(&self) -> Vec<String> {
        self.state.borrow().range_log.clone()
    }
}

/// Switch primitive that flips the world's active target.
#[derive(Debug, Clone)]
pub struct FakeSwitch {
    world: FakeWorld,
}

impl ToolchainSwitch for FakeSwitch {
    fn switch_to(&self, target: &str) -> Result<String> {
        let mut state = self.world.state.borrow_mut();
        state.switch_log.push(target.to_string());
        if state.refused.contains(target) {
            state.active = None;
            return Err(anyhow!("cannot install {target}"));
        }
        state.active = Some(target.to_string());
        Ok(format!("switched to {target}"))
    }

    fn build_info(&self) -> Result<String> {
        let state = self.world.state.borrow();
        let active = state
            .active
            .as_deref()
            .ok_or_else(|| anyhow!("no toolchain installed"))?;
        let hash = state
            .build_commits
            .get(active)
            .ok_or_else(|| anyhow!("{active} reports no build commit"))?;
        Ok(format!("Nim Compiler Version 2.1.1\ngit hash: {hash}\nactive boot switches: -d:release"))
    }
}

/// Sandbox whose verdict is decided by the active target.
#[derive(Debug, Clone)]
pub struct OracleSandbox {
    world: FakeWorld,
}

impl Sandbox for OracleSandbox {
    fn run(&self, _command_template: &str, _snippet: &str) -> SandboxRun {
        let mut state = self.world.state.borrow_mut();
        let Some(active) = state.active.clone() else {
            return SandboxRun::failed("no active toolchain");
        };
        state.run_log.push(active.clone());
        if state.passing.contains(&active) {
            SandboxRun {
                ok: true,
                output: "ok".to_string(),
            }
        } else {
            SandboxRun::failed(format!("assertion failed on {active}"))
        }
    }

    fn artifact_size(&self) -> u64 {
        if self.world.state.borrow().active.is_some() {
            2048
        } else {
            0
        }
    }
}

/// Source history over a fixed newest-first commit list.
#[derive(Debug)]
pub struct FakeHistory {
    world: FakeWorld,
    commits: Vec<CommitId>,
    tags: BTreeMap<String, CommitId>,
    branch: RefCell<Option<String>>,
    head: RefCell<Option<CommitId>>,
}

impl FakeHistory {
    pub fn with_tag(mut self, tag: &str, commit: CommitId) -> Self {
        self.tags.insert(tag.to_string(), commit);
        self
    }

    pub fn detached(self) -> Self {
        *self.branch.borrow_mut() = None;
        self
    }

    pub fn branch(&self) -> Option<String> {
        self.branch.borrow().clone()
    }
}

impl SourceHistory for FakeHistory {
    fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.branch.borrow().clone())
    }

    fn checkout(&self, rev: &str) -> Result<()> {
        self.world
            .state
            .borrow_mut()
            .checkout_log
            .push(rev.to_string());
        if let Some(commit) = self.tags.get(rev) {
            *self.head.borrow_mut() = Some(commit.clone());
            *self.branch.borrow_mut() = None;
            return Ok(());
        }
        if rev.starts_with('v') {
            return Err(anyhow!("pathspec '{rev}' did not match"));
        }
        *self.head.borrow_mut() = None;
        *self.branch.borrow_mut() = Some(rev.to_string());
        Ok(())
    }

    fn head_commit(&self) -> Result<CommitId> {
        self.head
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("HEAD is not a known commit"))
    }

    fn commits_between(&self, good: &CommitId, bad: &CommitId) -> Result<Vec<CommitId>> {
        self.world
            .state
            .borrow_mut()
            .range_log
            .push(format!("{good}..{bad}"));
        Ok(self.commits.clone())
    }

    fn metadata_of(&self, commit: &CommitId) -> Result<CommitMetadata> {
        self.world
            .state
            .borrow_mut()
            .metadata_log
            .push(commit.to_string());
        Ok(CommitMetadata {
            author: format!("dev-{commit}"),
            message: format!("change {commit}"),
            date: "2024-01-01 00:00:00 +0000".to_string(),
            changed_files: vec!["compiler/sem.nim".to_string()],
        })
    }
}

/// Diagnostics that record nothing and return fixed text.
#[derive(Debug, Clone, Default)]
pub struct CannedDiagnostics;

impl Diagnostics for CannedDiagnostics {
    fn ast_dump(&self, _snippet: &str) -> String {
        "StmtList".to_string()
    }

    fn intermediate(&self) -> String {
        "int main(void);".to_string()
    }
}
