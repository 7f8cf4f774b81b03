//! Build specification documents for container image builds.
//!
//! A build specification is an ordered set of phases, each holding shell
//! commands that run inside the build environment. Phases always execute in
//! the order `install`, `pre_build`, `build`, `post_build`.

mod docker;
mod environment;
mod error;
mod spec;

pub use docker::{
    docker_image_buildspec, image_tag_commands, registry_image_expr, IMAGE_TAG_LENGTH,
};
pub use environment::{
    BuildEnvironment, ComputeType, EnvironmentVariable, VariableType, ACCOUNT_ID_VAR,
    IMAGE_REPO_NAME_VAR, REGION_VAR, SOURCE_DIR_VAR, SOURCE_VERSION_VAR,
};
pub use error::BuildSpecError;
pub use spec::{BuildSpec, PhaseBody, Phases, RuntimeVersion};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The only buildspec version this crate emits and accepts.
pub const BUILDSPEC_VERSION: &str = "0.2";

/// A build phase.
///
/// The derived ordering is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Install,
    PreBuild,
    Build,
    PostBuild,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [Phase::Install, Phase::PreBuild, Phase::Build, Phase::PostBuild];

    /// Key used for this phase in a buildspec document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Install => "install",
            Phase::PreBuild => "pre_build",
            Phase::Build => "build",
            Phase::PostBuild => "post_build",
        }
    }

    /// The phase that runs after this one, if any.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Install => Some(Phase::PreBuild),
            Phase::PreBuild => Some(Phase::Build),
            Phase::Build => Some(Phase::PostBuild),
            Phase::PostBuild => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = BuildSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Phase::Install),
            "pre_build" => Ok(Phase::PreBuild),
            "build" => Ok(Phase::Build),
            "post_build" => Ok(Phase::PostBuild),
            other => Err(BuildSpecError::UnknownPhase(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(Phase::Install < Phase::PreBuild);
        assert!(Phase::PreBuild < Phase::Build);
        assert!(Phase::Build < Phase::PostBuild);

        let mut shuffled = vec![Phase::PostBuild, Phase::Install, Phase::Build, Phase::PreBuild];
        shuffled.sort();
        assert_eq!(shuffled, Phase::ALL.to_vec());
    }

    #[test]
    fn test_phase_next_walks_all() {
        let mut walked = vec![Phase::Install];
        while let Some(next) = walked.last().and_then(|p| p.next()) {
            walked.push(next);
        }
        assert_eq!(walked, Phase::ALL.to_vec());
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!("pre_build".parse::<Phase>().unwrap(), Phase::PreBuild);
        assert_eq!("post_build".parse::<Phase>().unwrap(), Phase::PostBuild);
        assert!("finally".parse::<Phase>().is_err());
    }
}
