//! Raw process execution primitive.
//!
//! The [`Exec`] trait decouples the sandbox, the toolchain switch and the
//! diagnostics from real process spawning. Tests use scripted implementations.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::io::config::TriageConfig;
use crate::io::process::run_command_with_timeout;

/// Memcheck profile applied to every run; only takes effect under `valgrind`.
pub const VALGRIND_OPTS: &str = "--tool=memcheck --leak-check=full --show-leak-kinds=all --undef-value-errors=yes --track-origins=yes --show-error-list=yes --keep-debuginfo=yes --show-emwarns=yes --demangle=yes --smc-check=none --num-callers=9 --max-threads=9";

/// Exit status and combined output of one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub ok: bool,
    pub output: String,
}

/// Synchronous command execution. `Err` means the command could not be run at all.
pub trait Exec {
    fn exec(&self, command_line: &str) -> Result<ExecOutput>;
}

/// Runs command lines through `sh -c` with a timeout and a fixed environment.
#[derive(Debug, Clone)]
pub struct ShellExec {
    workdir: PathBuf,
    env: Vec<(String, String)>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellExec {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            env: Vec::new(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Shell for sandbox runs, pinned to one `SOURCE_DATE_EPOCH` for the whole triage.
    pub fn for_triage(cfg: &TriageConfig, source_date_epoch: i64) -> Self {
        Self::new(
            cfg.sandbox.workdir.clone(),
            Duration::from_secs(cfg.sandbox.command_timeout_secs),
            cfg.sandbox.output_limit_bytes,
        )
        .with_env(triage_env(source_date_epoch))
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Exec for ShellExec {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn exec(&self, command_line: &str) -> Result<ExecOutput> {
        info!(command = command_line, "exec");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command_line)
            .current_dir(&self.workdir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run '{command_line}'"))?;
        debug!(ok = output.success(), "exec finished");
        Ok(ExecOutput {
            ok: output.success(),
            output: output.combined_text(),
        })
    }
}

/// Environment shared by every switch and sandbox command in one triage.
pub fn triage_env(source_date_epoch: i64) -> Vec<(String, String)> {
    vec![
        ("CHOOSENIM_NO_ANALYTICS".to_string(), "1".to_string()),
        ("SOURCE_DATE_EPOCH".to_string(), source_date_epoch.to_string()),
        ("VALGRIND_OPTS".to_string(), VALGRIND_OPTS.to_string()),
    ]
}

/// Quote `value` as a single POSIX shell word.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}
