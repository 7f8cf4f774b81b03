//! GitHub `push` webhook payloads.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::TriggerError;

const BRANCH_REF_PREFIX: &str = "refs/heads/";
const TAG_REF_PREFIX: &str = "refs/tags/";

#[derive(Debug, Clone, Deserialize)]
struct RawOwner {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    login: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRepository {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    owner: Option<RawOwner>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RawRepository,
}

/// What the pushed ref points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushedRef {
    Branch(String),
    Tag(String),
    Other(String),
}

/// A push event reduced to what the trigger needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub owner: String,
    pub repo: String,
    pub pushed_ref: PushedRef,
    /// Commit the ref points at after the push
    pub commit: String,
    /// The push deleted the ref
    pub deleted: bool,
}

impl PushEvent {
    /// Parse a webhook payload.
    pub fn from_json(json: &str) -> Result<Self, TriggerError> {
        let raw: RawPushEvent = serde_json::from_str(json)
            .map_err(|e| TriggerError::InvalidEvent(e.to_string()))?;

        let (owner, repo) = match raw.repository.full_name.as_deref().and_then(|f| f.split_once('/')) {
            Some((owner, repo)) => (owner.to_string(), repo.to_string()),
            None => {
                let owner = raw
                    .repository
                    .owner
                    .as_ref()
                    .and_then(|o| o.login.clone().or_else(|| o.name.clone()))
                    .ok_or_else(|| TriggerError::InvalidEvent("repository owner missing".to_string()))?;
                let repo = raw
                    .repository
                    .name
                    .clone()
                    .ok_or_else(|| TriggerError::InvalidEvent("repository name missing".to_string()))?;
                (owner, repo)
            }
        };

        if raw.after.trim().is_empty() {
            return Err(TriggerError::InvalidEvent("'after' commit is empty".to_string()));
        }

        let pushed_ref = if let Some(branch) = raw.git_ref.strip_prefix(BRANCH_REF_PREFIX) {
            PushedRef::Branch(branch.to_string())
        } else if let Some(tag) = raw.git_ref.strip_prefix(TAG_REF_PREFIX) {
            PushedRef::Tag(tag.to_string())
        } else {
            PushedRef::Other(raw.git_ref.clone())
        };

        Ok(Self {
            owner,
            repo,
            pushed_ref,
            commit: raw.after,
            deleted: raw.deleted,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, TriggerError> {
        let json = fs::read_to_string(path)
            .map_err(|e| TriggerError::InvalidEvent(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Branch name when the push targeted a branch.
    pub fn branch(&self) -> Option<&str> {
        match &self.pushed_ref {
            PushedRef::Branch(b) => Some(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUSH: &str = r#"{
        "ref": "refs/heads/master",
        "before": "0000000000000000000000000000000000000000",
        "after": "abcdef1234567890abcdef1234567890abcdef12",
        "deleted": false,
        "repository": {
            "name": "rails_ecs-rails_app",
            "full_name": "youn410/rails_ecs-rails_app",
            "owner": {"name": "youn410", "login": "youn410"}
        }
    }"#;

    #[test]
    fn test_parse_branch_push() {
        let event = PushEvent::from_json(PUSH).unwrap();
        assert_eq!(event.owner, "youn410");
        assert_eq!(event.repo, "rails_ecs-rails_app");
        assert_eq!(event.branch(), Some("master"));
        assert_eq!(event.commit, "abcdef1234567890abcdef1234567890abcdef12");
        assert!(!event.deleted);
    }

    #[test]
    fn test_parse_tag_push() {
        let json = PUSH.replace("refs/heads/master", "refs/tags/v1.0");
        let event = PushEvent::from_json(&json).unwrap();
        assert_eq!(event.pushed_ref, PushedRef::Tag("v1.0".to_string()));
        assert_eq!(event.branch(), None);
    }

    #[test]
    fn test_parse_without_full_name() {
        let json = r#"{
            "ref": "refs/heads/dev",
            "after": "1234567890",
            "repository": {"name": "app", "owner": {"login": "someone"}}
        }"#;
        let event = PushEvent::from_json(json).unwrap();
        assert_eq!(event.owner, "someone");
        assert_eq!(event.repo, "app");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            PushEvent::from_json("{}"),
            Err(TriggerError::InvalidEvent(_))
        ));
        let json = r#"{"ref": "refs/heads/x", "after": "1", "repository": {}}"#;
        assert!(PushEvent::from_json(json).is_err());
    }
}
