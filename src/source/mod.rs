//! Source trigger
//!
//! Decides whether a push event starts the pipeline and, when it does,
//! produces the source artifact: a deterministic snapshot of the checkout
//! plus the resolved revision.

mod event;
mod exclude;
mod snapshot;
mod token;

pub use event::{PushEvent, PushedRef};
pub use exclude::{ExcludeError, ExcludeRules, IGNORE_FILE_NAME};
pub use snapshot::{
    EntryType, ManifestEntry, Snapshot, SnapshotError, Snapshotter, SourceManifest,
};
pub use token::TokenRef;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SourceConfig;

/// How the managed pipeline learns about pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Repository webhook registered by the stack
    #[default]
    Webhook,
    /// The pipeline polls the repository
    Poll,
    /// Executions are started manually
    None,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Webhook => "webhook",
            TriggerMode::Poll => "poll",
            TriggerMode::None => "none",
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Missing or unusable access token. Fatal before any run exists.
    #[error("source authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("invalid push event: {0}")]
    InvalidEvent(String),
}

/// The watched repository and branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubSource {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: TokenRef,
    pub trigger: TriggerMode,
}

impl GitHubSource {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            token: config.token_ref(),
            trigger: config.trigger,
        }
    }

    /// `owner/repo`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// `refs/heads/<branch>`, the value webhook filters compare against.
    pub fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

/// The revision a fired trigger resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRevision {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Full commit id, later exposed as the resolved source version
    pub commit: String,
}

/// Why an event did not start the pipeline. Ignoring is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    TriggerDisabled,
    OtherRepository { expected: String, actual: String },
    OtherBranch { expected: String, actual: String },
    TagPush(String),
    NonBranchRef(String),
    BranchDeleted(String),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::TriggerDisabled => write!(f, "automatic triggering is disabled"),
            IgnoreReason::OtherRepository { expected, actual } => {
                write!(f, "push to {} does not match watched repository {}", actual, expected)
            }
            IgnoreReason::OtherBranch { expected, actual } => {
                write!(f, "push to branch '{}' does not match watched branch '{}'", actual, expected)
            }
            IgnoreReason::TagPush(tag) => write!(f, "push of tag '{}'", tag),
            IgnoreReason::NonBranchRef(r) => write!(f, "push to non-branch ref '{}'", r),
            IgnoreReason::BranchDeleted(b) => write!(f, "branch '{}' was deleted", b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Fire(SourceRevision),
    Ignore(IgnoreReason),
}

/// Matches push events against the watched branch.
#[derive(Debug, Clone)]
pub struct SourceTrigger {
    source: GitHubSource,
}

impl SourceTrigger {
    pub fn new(source: GitHubSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &GitHubSource {
        &self.source
    }

    pub fn evaluate(&self, event: &PushEvent) -> TriggerDecision {
        let decision = self.decide(event);
        match &decision {
            TriggerDecision::Fire(revision) => {
                tracing::info!(
                    repository = %self.source.full_name(),
                    branch = %revision.branch,
                    commit = %revision.commit,
                    "source trigger fired"
                );
            }
            TriggerDecision::Ignore(reason) => {
                tracing::info!(%reason, "push event ignored");
            }
        }
        decision
    }

    fn decide(&self, event: &PushEvent) -> TriggerDecision {
        if self.source.trigger == TriggerMode::None {
            return TriggerDecision::Ignore(IgnoreReason::TriggerDisabled);
        }

        // Repository names are case-insensitive on the host.
        if !event.owner.eq_ignore_ascii_case(&self.source.owner)
            || !event.repo.eq_ignore_ascii_case(&self.source.repo)
        {
            return TriggerDecision::Ignore(IgnoreReason::OtherRepository {
                expected: self.source.full_name(),
                actual: format!("{}/{}", event.owner, event.repo),
            });
        }

        let branch = match &event.pushed_ref {
            PushedRef::Branch(branch) => branch,
            PushedRef::Tag(tag) => return TriggerDecision::Ignore(IgnoreReason::TagPush(tag.clone())),
            PushedRef::Other(r) => {
                return TriggerDecision::Ignore(IgnoreReason::NonBranchRef(r.clone()))
            }
        };

        if branch != &self.source.branch {
            return TriggerDecision::Ignore(IgnoreReason::OtherBranch {
                expected: self.source.branch.clone(),
                actual: branch.clone(),
            });
        }

        if event.deleted {
            return TriggerDecision::Ignore(IgnoreReason::BranchDeleted(branch.clone()));
        }

        TriggerDecision::Fire(SourceRevision {
            owner: self.source.owner.clone(),
            repo: self.source.repo.clone(),
            branch: branch.clone(),
            commit: event.commit.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(trigger: TriggerMode) -> GitHubSource {
        GitHubSource {
            owner: "youn410".to_string(),
            repo: "rails_ecs-rails_app".to_string(),
            branch: "master".to_string(),
            token: TokenRef {
                secret_name: "github-oauth-token".to_string(),
                secret_field: None,
                env_var: "GITHUB_TOKEN".to_string(),
            },
            trigger,
        }
    }

    fn push(owner: &str, repo: &str, pushed_ref: PushedRef) -> PushEvent {
        PushEvent {
            owner: owner.to_string(),
            repo: repo.to_string(),
            pushed_ref,
            commit: "abcdef1234567890".to_string(),
            deleted: false,
        }
    }

    fn branch(name: &str) -> PushedRef {
        PushedRef::Branch(name.to_string())
    }

    #[test]
    fn test_push_to_watched_branch_fires() {
        let trigger = SourceTrigger::new(source(TriggerMode::Webhook));
        let decision = trigger.evaluate(&push("youn410", "rails_ecs-rails_app", branch("master")));
        match decision {
            TriggerDecision::Fire(rev) => {
                assert_eq!(rev.branch, "master");
                assert_eq!(rev.commit, "abcdef1234567890");
            }
            other => panic!("expected fire, got {:?}", other),
        }
    }

    #[test]
    fn test_other_branch_ignored() {
        let trigger = SourceTrigger::new(source(TriggerMode::Webhook));
        let decision = trigger.evaluate(&push("youn410", "rails_ecs-rails_app", branch("feature")));
        assert!(matches!(
            decision,
            TriggerDecision::Ignore(IgnoreReason::OtherBranch { .. })
        ));
    }

    #[test]
    fn test_other_repository_ignored() {
        let trigger = SourceTrigger::new(source(TriggerMode::Webhook));
        let decision = trigger.evaluate(&push("someone", "other", branch("master")));
        assert!(matches!(
            decision,
            TriggerDecision::Ignore(IgnoreReason::OtherRepository { .. })
        ));
    }

    #[test]
    fn test_repository_match_is_case_insensitive() {
        let trigger = SourceTrigger::new(source(TriggerMode::Webhook));
        let decision = trigger.evaluate(&push("Youn410", "Rails_ECS-rails_app", branch("master")));
        assert!(matches!(decision, TriggerDecision::Fire(_)));
    }

    #[test]
    fn test_tag_and_deletion_ignored() {
        let trigger = SourceTrigger::new(source(TriggerMode::Webhook));
        let tag = trigger.evaluate(&push(
            "youn410",
            "rails_ecs-rails_app",
            PushedRef::Tag("v1".to_string()),
        ));
        assert!(matches!(tag, TriggerDecision::Ignore(IgnoreReason::TagPush(_))));

        let mut deleted = push("youn410", "rails_ecs-rails_app", branch("master"));
        deleted.deleted = true;
        assert!(matches!(
            trigger.evaluate(&deleted),
            TriggerDecision::Ignore(IgnoreReason::BranchDeleted(_))
        ));
    }

    #[test]
    fn test_poll_mode_still_fires_on_push() {
        let trigger = SourceTrigger::new(source(TriggerMode::Poll));
        let decision = trigger.evaluate(&push("youn410", "rails_ecs-rails_app", branch("master")));
        assert!(matches!(decision, TriggerDecision::Fire(_)));
    }

    #[test]
    fn test_disabled_trigger_ignores() {
        let trigger = SourceTrigger::new(source(TriggerMode::None));
        let decision = trigger.evaluate(&push("youn410", "rails_ecs-rails_app", branch("master")));
        assert_eq!(decision, TriggerDecision::Ignore(IgnoreReason::TriggerDisabled));
    }

    #[test]
    fn test_branch_ref() {
        assert_eq!(source(TriggerMode::Webhook).branch_ref(), "refs/heads/master");
        assert_eq!(
            source(TriggerMode::Webhook).full_name(),
            "youn410/rails_ecs-rails_app"
        );
    }

    #[test]
    fn test_ignore_reason_display() {
        let reason = IgnoreReason::OtherBranch {
            expected: "master".to_string(),
            actual: "dev".to_string(),
        };
        assert_eq!(
            reason.to_string(),
            "push to branch 'dev' does not match watched branch 'master'"
        );
    }
}
