//! The process-wide active toolchain and the primitive that switches it.
//!
//! Switching mutates a global installation, so [`ActiveToolchain`] owns the
//! switch primitive and every switch goes through `&mut self`. Only one holder
//! exists per triage; the borrow checker keeps sandbox runs from interleaving
//! with a switch.

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::text::commit_from_build_info;
use crate::core::types::{CommitId, SwitchTarget};
use crate::error::SwitchError;
use crate::io::config::TriageConfig;
use crate::io::exec::{Exec, shell_quote};

/// Idempotent switch primitive. Callers own retrying.
pub trait ToolchainSwitch {
    /// Make `target` (a label or `#commit`) the active toolchain.
    fn switch_to(&self, target: &str) -> Result<String>;
    /// Self-reported build metadata of the active toolchain.
    fn build_info(&self) -> Result<String>;
}

/// Switches via a version manager command such as `choosenim update <target>`.
pub struct ManagerSwitch<E> {
    exec: E,
    program: String,
    args: Vec<String>,
    version_command: String,
}

impl<E: Exec> ManagerSwitch<E> {
    pub fn new(exec: E, cfg: &TriageConfig) -> Self {
        Self {
            exec,
            program: cfg.switch.program.clone(),
            args: cfg.switch.args.clone(),
            version_command: cfg.toolchain.version_command.clone(),
        }
    }

    fn command_line(&self, target: &str) -> String {
        let mut parts = vec![shell_quote(&self.program)];
        parts.extend(
            self.args
                .iter()
                .map(|arg| shell_quote(&arg.replace("{target}", target))),
        );
        parts.join(" ")
    }
}

impl<E: Exec> ToolchainSwitch for ManagerSwitch<E> {
    fn switch_to(&self, target: &str) -> Result<String> {
        let out = self.exec.exec(&self.command_line(target))?;
        if !out.ok {
            return Err(anyhow!("{}", out.output));
        }
        Ok(out.output)
    }

    fn build_info(&self) -> Result<String> {
        let out = self.exec.exec(&self.version_command)?;
        if !out.ok {
            return Err(anyhow!("{}", out.output));
        }
        Ok(out.output)
    }
}

/// Try a fallible operation a fixed number of times, without backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `op` until it succeeds or attempts run out. Each failure is logged.
    pub fn run<T>(
        &self,
        target: &str,
        mut op: impl FnMut(u32) -> Result<T>,
    ) -> Result<T, SwitchError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(spec = target, attempt, err = %err, "toolchain switch attempt failed");
                    last_error = format!("{err:#}");
                }
            }
        }
        warn!(
            spec = target,
            attempts = self.max_attempts,
            "giving up on toolchain switch"
        );
        Err(SwitchError {
            target: target.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}

/// Exclusive handle on the installed toolchain.
pub struct ActiveToolchain<S> {
    switch: S,
    policy: RetryPolicy,
    commit_marker: String,
    active: Option<String>,
    switch_calls: u32,
}

impl<S: ToolchainSwitch> ActiveToolchain<S> {
    pub fn new(switch: S, policy: RetryPolicy, commit_marker: impl Into<String>) -> Self {
        Self {
            switch,
            policy,
            commit_marker: commit_marker.into(),
            active: None,
            switch_calls: 0,
        }
    }

    pub fn from_config(switch: S, cfg: &TriageConfig) -> Self {
        Self::new(
            switch,
            RetryPolicy::new(cfg.switch.max_attempts),
            cfg.toolchain.commit_marker.clone(),
        )
    }

    /// Switch to `target`, retrying per the policy. On failure the active
    /// toolchain is unknown.
    #[instrument(skip_all, fields(spec = %target.spec()))]
    pub fn switch_to(&mut self, target: SwitchTarget<'_>) -> Result<(), SwitchError> {
        let spec = target.spec();
        self.active = None;
        let switch = &self.switch;
        let calls = &mut self.switch_calls;
        let result = self.policy.run(&spec, |_| {
            *calls += 1;
            switch.switch_to(&spec)
        });
        match result {
            Ok(output) => {
                info!(output = %output.lines().last().unwrap_or_default(), "toolchain switched");
                self.active = Some(spec);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Commit id the active toolchain reports it was built from.
    pub fn reported_commit(&self) -> Option<CommitId> {
        match self.switch.build_info() {
            Ok(banner) => commit_from_build_info(&banner, &self.commit_marker),
            Err(err) => {
                warn!(err = %err, "could not read toolchain build info");
                None
            }
        }
    }

    /// Target of the last successful switch.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Number of switch primitive invocations, retries included.
    pub fn switch_calls(&self) -> u32 {
        self.switch_calls
    }
}
