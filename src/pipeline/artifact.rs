//! Artifact names.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::PipelineError;

pub const MAX_ARTIFACT_NAME_LEN: usize = 100;

/// Name of a blob passed between stages. Letters, digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactName(String);

impl ArtifactName {
    pub fn new(name: impl Into<String>) -> Result<Self, PipelineError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_ARTIFACT_NAME_LEN
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(name))
        } else {
            Err(PipelineError::InvalidArtifactName(name))
        }
    }

    /// `Artifact_<stage>_<action>`: characters outside the allowed set are
    /// dropped and the result is cut at the length limit.
    pub fn for_action(stage: &str, action: &str) -> Result<Self, PipelineError> {
        let name: String = format!("Artifact_{}_{}", stage, action)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(MAX_ARTIFACT_NAME_LEN)
            .collect();
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactName {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactName> for String {
    fn from(name: ArtifactName) -> Self {
        name.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
