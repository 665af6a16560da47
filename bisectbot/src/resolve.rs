//! Version resolution: map a label to the commit it was built from.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use crate::core::types::{CommitId, SwitchTarget, VersionLabel};
use crate::error::ResolutionError;
use crate::io::config::TriageConfig;
use crate::io::git::SourceHistory;
use crate::io::toolchain::{ActiveToolchain, ToolchainSwitch};

/// Resolves labels through the static table, release tags, or the installed toolchain.
#[derive(Debug, Clone)]
pub struct Resolver {
    pinned: BTreeMap<String, CommitId>,
    default_branch: String,
}

impl Resolver {
    pub fn new(pinned: BTreeMap<String, CommitId>, default_branch: impl Into<String>) -> Self {
        Self {
            pinned,
            default_branch: default_branch.into(),
        }
    }

    /// Entries that do not parse as commit ids are dropped with a warning.
    pub fn from_config(cfg: &TriageConfig) -> Self {
        let pinned = cfg
            .pinned_commits
            .iter()
            .filter_map(|(tag, raw)| match CommitId::parse(raw) {
                Some(commit) => Some((tag.trim().to_lowercase(), commit)),
                None => {
                    warn!(tag = %tag, raw = %raw, "ignoring unparseable pinned commit");
                    None
                }
            })
            .collect();
        Self::new(pinned, cfg.source.default_branch.clone())
    }

    /// Look up `label` in the static table only.
    pub fn pinned(&self, label: &VersionLabel) -> Option<&CommitId> {
        match label {
            VersionLabel::Pinned(name) => self.pinned.get(name),
            VersionLabel::Floating(_) => None,
        }
    }

    /// Resolve `label` to a commit id.
    ///
    /// Floating labels switch the active toolchain as a side effect.
    #[instrument(skip_all, fields(label = %label))]
    pub fn resolve<S, H>(
        &self,
        label: &VersionLabel,
        toolchain: &mut ActiveToolchain<S>,
        history: &H,
    ) -> Result<CommitId, ResolutionError>
    where
        S: ToolchainSwitch,
        H: SourceHistory,
    {
        if label.as_str().trim().is_empty() {
            return Err(ResolutionError::EmptyLabel);
        }
        if let Some(commit) = self.pinned(label) {
            debug!(commit = %commit, "resolved from static table");
            return Ok(commit.clone());
        }
        let commit = match label {
            VersionLabel::Floating(_) => resolve_floating(label, toolchain)?,
            VersionLabel::Pinned(name) => self.resolve_tag(name, history)?,
        };
        info!(commit = %commit, "resolved label");
        Ok(commit)
    }

    /// Check out `v<name>`, read HEAD, and put the previous branch back.
    fn resolve_tag<H: SourceHistory>(
        &self,
        name: &str,
        history: &H,
    ) -> Result<CommitId, ResolutionError> {
        let tag_error = |err: anyhow::Error| ResolutionError::Tag {
            label: name.to_string(),
            reason: format!("{err:#}"),
        };
        let previous = history
            .current_branch()
            .map_err(tag_error)?
            .unwrap_or_else(|| self.default_branch.clone());
        let tag = format!("v{name}");
        let head = history.checkout(&tag).and_then(|()| history.head_commit());
        if let Err(err) = history.checkout(&previous) {
            warn!(branch = %previous, err = %err, "could not restore checkout");
        }
        head.map_err(tag_error)
    }
}

fn resolve_floating<S: ToolchainSwitch>(
    label: &VersionLabel,
    toolchain: &mut ActiveToolchain<S>,
) -> Result<CommitId, ResolutionError> {
    toolchain
        .switch_to(SwitchTarget::Label(label))
        .map_err(|source| ResolutionError::Switch {
            label: label.to_string(),
            source,
        })?;
    toolchain
        .reported_commit()
        .ok_or_else(|| ResolutionError::MissingBuildCommit {
            label: label.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeWorld, commit};

    fn resolver() -> Resolver {
        Resolver::from_config(&TriageConfig::default())
    }

    fn pinned(name: &str) -> VersionLabel {
        VersionLabel::Pinned(name.to_string())
    }

    #[test]
    fn static_table_hits_never_switch() {
        let world = FakeWorld::new();
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new());
        let commit = resolver()
            .resolve(&pinned("2.0.0"), &mut toolchain, &history)
            .expect("resolve");
        assert_eq!(commit.as_str(), "a488067");
        assert!(world.switch_log().is_empty());
        assert!(world.checkout_log().is_empty());
    }

    #[test]
    fn floating_label_reads_build_commit_after_switch() {
        let world = FakeWorld::new().reporting("devel", "0123abcd");
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new());
        let label = VersionLabel::Floating("devel".to_string());
        let commit = resolver()
            .resolve(&label, &mut toolchain, &history)
            .expect("resolve");
        assert_eq!(commit.as_str(), "0123abcd");
        assert_eq!(world.active().as_deref(), Some("devel"));
    }

    #[test]
    fn floating_label_fails_after_three_attempts() {
        let world = FakeWorld::new().refusing("devel");
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new());
        let label = VersionLabel::Floating("devel".to_string());
        let err = resolver()
            .resolve(&label, &mut toolchain, &history)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Switch { .. }));
        assert_eq!(world.switch_log().len(), 3);
    }

    #[test]
    fn floating_label_without_build_commit_is_an_error() {
        let world = FakeWorld::new();
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new());
        let label = VersionLabel::Floating("stable".to_string());
        let err = resolver()
            .resolve(&label, &mut toolchain, &history)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::MissingBuildCommit { .. }));
    }

    #[test]
    fn other_pinned_labels_use_release_tag_and_restore_branch() {
        let world = FakeWorld::new();
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new()).with_tag("v1.6.14", commit(7));
        let resolved = resolver()
            .resolve(&pinned("1.6.14"), &mut toolchain, &history)
            .expect("resolve");
        assert_eq!(resolved, commit(7));
        assert_eq!(world.checkout_log(), vec!["v1.6.14", "devel"]);
        assert_eq!(history.branch().as_deref(), Some("devel"));
        assert!(world.switch_log().is_empty());
    }

    #[test]
    fn detached_checkout_is_restored_to_default_branch() {
        let world = FakeWorld::new();
        let mut toolchain = world.toolchain();
        let history = world
            .history(Vec::new())
            .with_tag("v1.4.8", commit(3))
            .detached();
        resolver()
            .resolve(&pinned("1.4.8"), &mut toolchain, &history)
            .expect("resolve");
        assert_eq!(world.checkout_log(), vec!["v1.4.8", "devel"]);
    }

    #[test]
    fn missing_tag_is_a_resolution_error_and_still_restores() {
        let world = FakeWorld::new();
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new());
        let err = resolver()
            .resolve(&pinned("9.9.9"), &mut toolchain, &history)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Tag { .. }));
        assert_eq!(world.checkout_log(), vec!["v9.9.9", "devel"]);
    }

    #[test]
    fn empty_label_is_rejected() {
        let world = FakeWorld::new();
        let mut toolchain = world.toolchain();
        let history = world.history(Vec::new());
        let err = resolver()
            .resolve(&pinned(" "), &mut toolchain, &history)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyLabel));
    }
}
