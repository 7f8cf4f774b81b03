use thiserror::Error;

use crate::Phase;

/// Errors from building, parsing or validating a buildspec.
#[derive(Debug, Error)]
pub enum BuildSpecError {
    #[error("unsupported buildspec version '{0}' (expected 0.2)")]
    UnsupportedVersion(String),

    #[error("unknown phase '{0}'")]
    UnknownPhase(String),

    #[error("phase {0} has no commands and no runtime versions")]
    EmptyPhase(Phase),

    #[error("phase {phase} command #{index} is empty")]
    EmptyCommand { phase: Phase, index: usize },

    #[error("runtime-versions are only allowed in the install phase, found in {0}")]
    RuntimeOutsideInstall(Phase),

    #[error("buildspec has no phases")]
    NoPhases,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
