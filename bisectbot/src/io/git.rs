//! Git adapter for the toolchain source checkout.
//!
//! Bisection needs a handful of history queries, so we keep a small, explicit
//! wrapper around `git` subprocess calls behind the [`SourceHistory`] trait.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CommitId, CommitMetadata};

/// Source-history primitives used by the resolver and the bisector.
pub trait SourceHistory {
    /// Current branch name, `None` on a detached HEAD.
    fn current_branch(&self) -> Result<Option<String>>;
    /// Check out a branch, tag or commit.
    fn checkout(&self, rev: &str) -> Result<()>;
    /// Short id of the checked-out commit.
    fn head_commit(&self) -> Result<CommitId>;
    /// Commits reachable from `bad` but not from `good`, newest first.
    fn commits_between(&self, good: &CommitId, bad: &CommitId) -> Result<Vec<CommitId>>;
    /// Author, message, date and touched files of one commit.
    fn metadata_of(&self, commit: &CommitId) -> Result<CommitMetadata>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `url` into the workdir unless it already exists, then check out `branch`.
    #[instrument(skip_all, fields(url = %url, branch = %branch))]
    pub fn ensure_cloned(&self, url: &str, branch: &str) -> Result<()> {
        if self.workdir.exists() {
            debug!(dir = %self.workdir.display(), "source checkout already present");
            return Ok(());
        }
        info!(url, dir = %self.workdir.display(), "cloning toolchain sources");
        let output = Command::new("git")
            .arg("clone")
            .arg(url)
            .arg(&self.workdir)
            .output()
            .context("spawn git clone")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git clone {url} failed: {}", stderr.trim()));
        }
        self.run_checked(&["config", "advice.detachedHead", "false"])?;
        self.checkout(branch)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl SourceHistory for Git {
    fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Ok(None);
        }
        debug!(branch = %name, "current branch");
        Ok(Some(name))
    }

    #[instrument(skip_all, fields(rev = %rev))]
    fn checkout(&self, rev: &str) -> Result<()> {
        debug!(rev, "checking out");
        self.run_checked(&["checkout", rev])?;
        Ok(())
    }

    fn head_commit(&self) -> Result<CommitId> {
        let out = self.run_capture(&["rev-parse", "--short", "HEAD"])?;
        CommitId::parse(&out).ok_or_else(|| anyhow!("unexpected rev-parse output '{}'", out.trim()))
    }

    #[instrument(skip_all, fields(good = %good, bad = %bad))]
    fn commits_between(&self, good: &CommitId, bad: &CommitId) -> Result<Vec<CommitId>> {
        let range = format!("{good}..{bad}");
        let out = self.run_capture(&["log", "--pretty=format:%h", &range])?;
        let commits = parse_commit_list(&out)?;
        debug!(count = commits.len(), "listed commits");
        Ok(commits)
    }

    fn metadata_of(&self, commit: &CommitId) -> Result<CommitMetadata> {
        let rev = commit.as_str();
        let author = self.run_capture(&["log", "-1", "--pretty=format:%an", rev])?;
        let message = self.run_capture(&["log", "-1", "--pretty=format:%B", rev])?;
        let date = self.run_capture(&["log", "-1", "--pretty=format:%ai", rev])?;
        let files =
            self.run_capture(&["diff-tree", "--no-commit-id", "--name-only", "-r", rev])?;
        Ok(CommitMetadata {
            author: author.trim().to_lowercase(),
            message: message.trim().to_string(),
            date: date.trim().to_string(),
            changed_files: files
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

fn parse_commit_list(out: &str) -> Result<Vec<CommitId>> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| CommitId::parse(line).ok_or_else(|| anyhow!("unexpected git log line '{line}'")))
        .collect()
}
