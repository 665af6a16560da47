//! Triage configuration stored in `bisectbot.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::VersionLabel;
use crate::core::window::MIN_SCAN_THRESHOLD;

pub const DEFAULT_CONFIG_FILE: &str = "bisectbot.toml";

/// Triage configuration (TOML).
///
/// Loaded once per run and read-only afterwards. Missing fields fall back to the
/// values used for the Nim toolchain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TriageConfig {
    /// Labels swept front to back. Order decides first-works/first-fails.
    pub matrix: Vec<String>,

    /// Labels that are moving targets and resolve through the installed toolchain.
    pub floating_labels: Vec<String>,

    /// Hand-maintained release tag -> commit id table.
    pub pinned_commits: BTreeMap<String, String>,

    pub switch: SwitchConfig,
    pub toolchain: ToolchainConfig,
    pub source: SourceConfig,
    pub sandbox: SandboxConfig,
    pub bisect: BisectConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SwitchConfig {
    /// Version manager executable.
    pub program: String,
    /// Arguments; `{target}` is replaced with the label or `#commit`.
    pub args: Vec<String>,
    /// Attempts before giving up on a switch.
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Command printing the active toolchain's build metadata.
    pub version_command: String,
    /// Line prefix in that output carrying the commit hash.
    pub commit_marker: String,
    /// Command producing a structural dump of `{dumper}`.
    pub ast_command: String,
    /// Host tools whose versions are listed in the report.
    pub host_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub repo_url: String,
    /// Checkout directory, relative to the sandbox workdir unless absolute.
    pub checkout_dir: PathBuf,
    /// Branch restored after reading a release tag.
    pub default_branch: String,
    /// Prefix for commit links in the report.
    pub commit_url_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub workdir: PathBuf,
    /// Write-once input artifact name.
    pub input_file: String,
    /// Compiled output artifact name.
    pub output_file: String,
    /// Per-command wall-clock limit.
    pub command_timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BisectConfig {
    /// Residual window size at which halving stops and the linear scan starts.
    pub scan_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccessConfig {
    /// Any requester may trigger a triage.
    pub allow_all: bool,
    /// Logins allowed regardless of association.
    pub privileged_logins: Vec<String>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            program: "choosenim".to_string(),
            args: ["--noColor", "--skipClean", "--yes", "update", "{target}"]
                .map(String::from)
                .to_vec(),
            max_attempts: 3,
            timeout_secs: 60 * 60,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            version_command: "nim --version".to_string(),
            commit_marker: "git hash:".to_string(),
            ast_command: "nim check --verbosity:0 --hints:off --warnings:off --colors:off --lineTrace:off --forceBuild:on --import:std/macros {dumper}".to_string(),
            host_tools: ["gcc", "clang", "node"].map(String::from).to_vec(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/nim-lang/Nim.git".to_string(),
            checkout_dir: PathBuf::from("Nim"),
            default_branch: "devel".to_string(),
            commit_url_prefix: "https://github.com/nim-lang/Nim/commit/".to_string(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            input_file: "temp.nim".to_string(),
            output_file: "temp".to_string(),
            command_timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for BisectConfig {
    fn default() -> Self {
        Self { scan_threshold: 10 }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allow_all: true,
            privileged_logins: vec!["araq".to_string()],
        }
    }
}

impl Default for TriageConfig {
    fn default() -> Self {
        let pinned_commits = [
            ("2.0.0", "a488067"),
            ("1.6.0", "727c637"),
            ("1.4.0", "018ae96"),
            ("1.2.0", "7e83adf"),
            ("1.0.0", "f7a8fc4"),
            ("0.20.2", "88a0edb"),
        ]
        .into_iter()
        .map(|(tag, commit)| (tag.to_string(), commit.to_string()))
        .collect();
        Self {
            matrix: ["devel", "stable", "2.0.0", "1.6.14", "1.4.8", "1.2.18", "1.0.10"]
                .map(String::from)
                .to_vec(),
            floating_labels: vec!["devel".to_string(), "stable".to_string()],
            pinned_commits,
            switch: SwitchConfig::default(),
            toolchain: ToolchainConfig::default(),
            source: SourceConfig::default(),
            sandbox: SandboxConfig::default(),
            bisect: BisectConfig::default(),
            access: AccessConfig::default(),
        }
    }
}

impl TriageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.matrix.is_empty() || self.matrix.iter().any(|label| label.trim().is_empty()) {
            return Err(anyhow!("matrix must be a non-empty list of labels"));
        }
        if self.switch.program.trim().is_empty() {
            return Err(anyhow!("switch.program must not be empty"));
        }
        if !self.switch.args.iter().any(|arg| arg.contains("{target}")) {
            return Err(anyhow!("switch.args must contain a {{target}} placeholder"));
        }
        if self.switch.max_attempts == 0 {
            return Err(anyhow!("switch.max_attempts must be > 0"));
        }
        if self.switch.timeout_secs == 0 || self.sandbox.command_timeout_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.input_file.trim().is_empty() || self.sandbox.output_file.trim().is_empty()
        {
            return Err(anyhow!("sandbox input/output file names must not be empty"));
        }
        if self.bisect.scan_threshold < MIN_SCAN_THRESHOLD {
            return Err(anyhow!(
                "bisect.scan_threshold must be >= {MIN_SCAN_THRESHOLD}"
            ));
        }
        for (tag, commit) in &self.pinned_commits {
            if crate::core::types::CommitId::parse(commit).is_none() {
                return Err(anyhow!("pinned_commits.{tag} is not a commit id: '{commit}'"));
            }
        }
        Ok(())
    }

    /// Matrix labels classified as pinned or floating, in configured order.
    pub fn matrix_labels(&self) -> Vec<VersionLabel> {
        self.matrix
            .iter()
            .map(|raw| self.label(raw))
            .collect()
    }

    pub fn label(&self, raw: &str) -> VersionLabel {
        VersionLabel::classify(raw, &self.floating_labels)
    }

    /// Source checkout location, anchored at the sandbox workdir.
    pub fn checkout_path(&self) -> PathBuf {
        if self.source.checkout_dir.is_absolute() {
            self.source.checkout_dir.clone()
        } else {
            self.sandbox.workdir.join(&self.source.checkout_dir)
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TriageConfig::default()`.
pub fn load_config(path: &Path) -> Result<TriageConfig> {
    if !path.exists() {
        let cfg = TriageConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TriageConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TriageConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
