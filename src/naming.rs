//! Names derived from the application identifier.
//!
//! Every resource name in the stack comes from one externally supplied
//! application name: the registry repository (`<app>/rails`), the action
//! names, the build project id, and the image reference pushed by the build.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use ecr_buildspec::IMAGE_TAG_LENGTH;

/// Path segment appended to the app name to form the repository name.
pub const IMAGE_NAMESPACE: &str = "rails";

/// Maximum app name length; keeps `<app>/rails` within the registry limit.
pub const MAX_APP_NAME_LEN: usize = 200;

/// CloudFormation pseudo parameter for the account id.
pub const ACCOUNT_ID_PSEUDO: &str = "${AWS::AccountId}";

/// CloudFormation pseudo parameter for the region.
pub const REGION_PSEUDO: &str = "${AWS::Region}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("app name must not be empty")]
    EmptyAppName,

    #[error("app name '{0}' is longer than {} characters", MAX_APP_NAME_LEN)]
    AppNameTooLong(String),

    #[error("app name '{0}' must be lowercase letters and digits separated by '.', '_' or '-'")]
    InvalidAppName(String),

    #[error("source version '{0}' is shorter than {} characters", IMAGE_TAG_LENGTH)]
    SourceVersionTooShort(String),

    #[error("source version '{0}' contains characters not allowed in an image tag")]
    InvalidSourceVersion(String),

    #[error("account id '{0}' must be 12 digits")]
    InvalidAccountId(String),

    #[error("region '{0}' is not a valid region name")]
    InvalidRegion(String),
}

fn app_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("app name pattern compiles")
    })
}

fn region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{2}(?:-[a-z]+)+-[0-9]+$").expect("region pattern compiles")
    })
}

/// Validated application identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::EmptyAppName);
        }
        if name.len() > MAX_APP_NAME_LEN {
            return Err(NameError::AppNameTooLong(name));
        }
        if !app_name_pattern().is_match(&name) {
            return Err(NameError::InvalidAppName(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Registry repository the build pushes to.
    pub fn repository_name(&self) -> RepositoryName {
        RepositoryName(format!("{}/{}", self.0, IMAGE_NAMESPACE))
    }

    pub fn source_action_name(&self) -> String {
        format!("{}-GitHub-source-action", self.0)
    }

    pub fn build_action_name(&self) -> String {
        format!("{}-docker-build-action", self.0)
    }

    /// Construct id of the build project.
    pub fn build_project_id(&self) -> String {
        format!("{}-docker-build-pipeline-project", self.0)
    }
}

impl TryFrom<String> for AppName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AppName> for String {
    fn from(name: AppName) -> Self {
        name.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry repository name, always `<app>/rails`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryName(String);

impl RepositoryName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image tag derived from a resolved source version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTag(String);

impl ImageTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First seven characters of the source version.
///
/// Versions shorter than seven characters are rejected instead of producing
/// a short tag.
pub fn derive_image_tag(source_version: &str) -> Result<ImageTag, NameError> {
    let tag: String = source_version.chars().take(IMAGE_TAG_LENGTH).collect();
    if tag.chars().count() < IMAGE_TAG_LENGTH {
        return Err(NameError::SourceVersionTooShort(source_version.to_string()));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(NameError::InvalidSourceVersion(source_version.to_string()));
    }
    Ok(ImageTag(tag))
}

/// Account and region the stack is bound to.
///
/// Unset values stay deferred as CloudFormation pseudo parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEnv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl StackEnv {
    pub fn new(account: Option<String>, region: Option<String>) -> Result<Self, NameError> {
        if let Some(account) = &account {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(NameError::InvalidAccountId(account.clone()));
            }
        }
        if let Some(region) = &region {
            if !region_pattern().is_match(region) {
                return Err(NameError::InvalidRegion(region.clone()));
            }
        }
        Ok(Self { account, region })
    }

    /// Account id, or the pseudo parameter when deferred.
    pub fn account_expr(&self) -> &str {
        self.account.as_deref().unwrap_or(ACCOUNT_ID_PSEUDO)
    }

    /// Region, or the pseudo parameter when deferred.
    pub fn region_expr(&self) -> &str {
        self.region.as_deref().unwrap_or(REGION_PSEUDO)
    }

    pub fn is_concrete(&self) -> bool {
        self.account.is_some() && self.region.is_some()
    }

    /// Registry host, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`.
    pub fn registry_host(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com",
            self.account_expr(),
            self.region_expr()
        )
    }

    /// Repository URI without a tag.
    pub fn repository_uri(&self, repository: &RepositoryName) -> String {
        format!("{}/{}", self.registry_host(), repository)
    }

    /// Full image reference pushed by the build.
    pub fn image_uri(&self, repository: &RepositoryName, tag: &ImageTag) -> String {
        format!("{}:{}", self.repository_uri(repository), tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_name() {
        let app = AppName::new("myapp").unwrap();
        assert_eq!(app.repository_name().as_str(), "myapp/rails");
    }

    #[test]
    fn test_derived_action_names() {
        let app = AppName::new("myapp").unwrap();
        assert_eq!(app.source_action_name(), "myapp-GitHub-source-action");
        assert_eq!(app.build_action_name(), "myapp-docker-build-action");
        assert_eq!(app.build_project_id(), "myapp-docker-build-pipeline-project");
    }

    #[test]
    fn test_app_name_validation() {
        assert!(AppName::new("my-app.v2_x").is_ok());
        assert_eq!(AppName::new(""), Err(NameError::EmptyAppName));
        assert!(matches!(AppName::new("MyApp"), Err(NameError::InvalidAppName(_))));
        assert!(matches!(AppName::new("-app"), Err(NameError::InvalidAppName(_))));
        assert!(matches!(AppName::new("a//b"), Err(NameError::InvalidAppName(_))));
        assert!(matches!(
            AppName::new("a".repeat(MAX_APP_NAME_LEN + 1)),
            Err(NameError::AppNameTooLong(_))
        ));
    }

    #[test]
    fn test_app_name_serde_validates() {
        let ok: AppName = serde_json::from_str("\"myapp\"").unwrap();
        assert_eq!(ok.as_str(), "myapp");
        assert!(serde_json::from_str::<AppName>("\"Bad Name\"").is_err());
    }

    #[test]
    fn test_image_tag_from_commit() {
        assert_eq!(derive_image_tag("abcdef1234567").unwrap().as_str(), "abcdef1");
        assert_eq!(derive_image_tag("abcdef1").unwrap().as_str(), "abcdef1");
    }

    #[test]
    fn test_image_tag_short_version_rejected() {
        assert_eq!(
            derive_image_tag("abc"),
            Err(NameError::SourceVersionTooShort("abc".to_string()))
        );
        assert!(derive_image_tag("").is_err());
    }

    #[test]
    fn test_image_tag_invalid_chars() {
        assert!(matches!(
            derive_image_tag("ab cd efg"),
            Err(NameError::InvalidSourceVersion(_))
        ));
    }

    #[test]
    fn test_stack_env_deferred() {
        let env = StackEnv::default();
        assert!(!env.is_concrete());
        assert_eq!(
            env.registry_host(),
            "${AWS::AccountId}.dkr.ecr.${AWS::Region}.amazonaws.com"
        );
    }

    #[test]
    fn test_image_uri() {
        let env = StackEnv::new(
            Some("123456789012".to_string()),
            Some("ap-northeast-1".to_string()),
        )
        .unwrap();
        let repo = AppName::new("myapp").unwrap().repository_name();
        let tag = derive_image_tag("abcdef1234567").unwrap();
        assert_eq!(
            env.image_uri(&repo, &tag),
            "123456789012.dkr.ecr.ap-northeast-1.amazonaws.com/myapp/rails:abcdef1"
        );
    }

    #[test]
    fn test_stack_env_validation() {
        assert!(matches!(
            StackEnv::new(Some("1234".to_string()), None),
            Err(NameError::InvalidAccountId(_))
        ));
        assert!(matches!(
            StackEnv::new(None, Some("Tokyo".to_string())),
            Err(NameError::InvalidRegion(_))
        ));
        assert!(StackEnv::new(None, Some("us-gov-west-1".to_string())).is_ok());
    }
}
