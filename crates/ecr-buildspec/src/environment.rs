//! Build environment and injected variables.

use serde::{Deserialize, Serialize};

/// Account the image is pushed to.
pub const ACCOUNT_ID_VAR: &str = "AWS_ACCOUNT_ID";
/// Region of the registry.
pub const REGION_VAR: &str = "AWS_REGION";
/// Repository path inside the registry.
pub const IMAGE_REPO_NAME_VAR: &str = "IMAGE_REPO_NAME";
/// Commit the source stage resolved.
pub const SOURCE_VERSION_VAR: &str = "CODEBUILD_RESOLVED_SOURCE_VERSION";
/// Directory holding the extracted source artifact.
pub const SOURCE_DIR_VAR: &str = "CODEBUILD_SRC_DIR";

/// How a variable's value is interpreted by the build service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableType {
    #[default]
    Plaintext,
    ParameterStore,
    SecretsManager,
}

/// A variable injected into every phase command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    pub value: String,
}

impl EnvironmentVariable {
    pub fn plaintext(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            var_type: VariableType::Plaintext,
            value: value.into(),
        }
    }
}

/// Compute size of the build host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ComputeType {
    #[default]
    #[serde(rename = "BUILD_GENERAL1_SMALL")]
    Small,
    #[serde(rename = "BUILD_GENERAL1_MEDIUM")]
    Medium,
    #[serde(rename = "BUILD_GENERAL1_LARGE")]
    Large,
}

impl ComputeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeType::Small => "BUILD_GENERAL1_SMALL",
            ComputeType::Medium => "BUILD_GENERAL1_MEDIUM",
            ComputeType::Large => "BUILD_GENERAL1_LARGE",
        }
    }
}

/// The ephemeral container the phases run in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    /// Managed build image
    pub image: String,

    pub compute_type: ComputeType,

    /// Privileged mode is required to run the Docker daemon inside the build
    pub privileged: bool,
}

impl Default for BuildEnvironment {
    fn default() -> Self {
        Self {
            image: "aws/codebuild/standard:2.0".to_string(),
            compute_type: ComputeType::Small,
            privileged: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_variable_json() {
        let var = EnvironmentVariable::plaintext("IMAGE_REPO_NAME", "myapp/rails");
        let json = serde_json::to_value(&var).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "IMAGE_REPO_NAME", "type": "PLAINTEXT", "value": "myapp/rails"})
        );
    }

    #[test]
    fn test_default_environment() {
        let env = BuildEnvironment::default();
        assert_eq!(env.image, "aws/codebuild/standard:2.0");
        assert!(env.privileged);
        assert_eq!(env.compute_type.as_str(), "BUILD_GENERAL1_SMALL");
    }
}
