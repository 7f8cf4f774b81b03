//! The buildspec document model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BuildSpecError;
use crate::{Phase, BUILDSPEC_VERSION};

/// A runtime version pin under `runtime-versions`.
///
/// Kept untagged so `docker: 18` stays a number in the emitted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuntimeVersion {
    Major(u32),
    Named(String),
}

impl From<u32> for RuntimeVersion {
    fn from(major: u32) -> Self {
        RuntimeVersion::Major(major)
    }
}

impl From<&str> for RuntimeVersion {
    fn from(name: &str) -> Self {
        RuntimeVersion::Named(name.to_string())
    }
}

/// Body of a single phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBody {
    /// Runtime pins (install phase only)
    #[serde(
        rename = "runtime-versions",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub runtime_versions: BTreeMap<String, RuntimeVersion>,

    /// Shell commands, run in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
}

impl PhaseBody {
    pub fn is_empty(&self) -> bool {
        self.runtime_versions.is_empty() && self.commands.is_empty()
    }
}

/// The `phases` section.
///
/// Field order matches execution order, so serialization emits the phases
/// the way they run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phases {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<PhaseBody>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<PhaseBody>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<PhaseBody>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_build: Option<PhaseBody>,
}

impl Phases {
    fn slot(&self, phase: Phase) -> &Option<PhaseBody> {
        match phase {
            Phase::Install => &self.install,
            Phase::PreBuild => &self.pre_build,
            Phase::Build => &self.build,
            Phase::PostBuild => &self.post_build,
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<PhaseBody> {
        match phase {
            Phase::Install => &mut self.install,
            Phase::PreBuild => &mut self.pre_build,
            Phase::Build => &mut self.build,
            Phase::PostBuild => &mut self.post_build,
        }
    }
}

/// A buildspec document (`version: 0.2`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub version: String,
    pub phases: Phases,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildSpec {
    /// Create an empty version 0.2 buildspec.
    pub fn new() -> Self {
        Self {
            version: BUILDSPEC_VERSION.to_string(),
            phases: Phases::default(),
        }
    }

    /// Pin a runtime in the install phase.
    pub fn with_runtime(mut self, name: impl Into<String>, version: impl Into<RuntimeVersion>) -> Self {
        self.phases
            .slot_mut(Phase::Install)
            .get_or_insert_with(PhaseBody::default)
            .runtime_versions
            .insert(name.into(), version.into());
        self
    }

    /// Append commands to a phase.
    pub fn with_commands<I, S>(mut self, phase: Phase, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases
            .slot_mut(phase)
            .get_or_insert_with(PhaseBody::default)
            .commands
            .extend(commands.into_iter().map(Into::into));
        self
    }

    /// Body of a phase, if declared.
    pub fn phase(&self, phase: Phase) -> Option<&PhaseBody> {
        self.phases.slot(phase).as_ref()
    }

    /// Declared phases in execution order.
    pub fn ordered_phases(&self) -> impl Iterator<Item = (Phase, &PhaseBody)> + '_ {
        Phase::ALL
            .into_iter()
            .filter_map(move |phase| self.phase(phase).map(|body| (phase, body)))
    }

    /// Total number of commands across all phases.
    pub fn command_count(&self) -> usize {
        self.ordered_phases().map(|(_, body)| body.commands.len()).sum()
    }

    /// Check structural rules.
    pub fn validate(&self) -> Result<(), BuildSpecError> {
        if self.version != BUILDSPEC_VERSION {
            return Err(BuildSpecError::UnsupportedVersion(self.version.clone()));
        }

        let mut declared = 0;
        for (phase, body) in self.ordered_phases() {
            declared += 1;
            if body.is_empty() {
                return Err(BuildSpecError::EmptyPhase(phase));
            }
            if phase != Phase::Install && !body.runtime_versions.is_empty() {
                return Err(BuildSpecError::RuntimeOutsideInstall(phase));
            }
            if let Some(index) = body.commands.iter().position(|c| c.trim().is_empty()) {
                return Err(BuildSpecError::EmptyCommand { phase, index });
            }
        }

        if declared == 0 {
            return Err(BuildSpecError::NoPhases);
        }

        Ok(())
    }

    /// Pretty JSON, two-space indent, as embedded in a build project.
    pub fn to_json_pretty(&self) -> Result<String, BuildSpecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// YAML, as written to `buildspec.yml`.
    pub fn to_yaml(&self) -> Result<String, BuildSpecError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, BuildSpecError> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, BuildSpecError> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }
}
