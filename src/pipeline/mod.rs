//! Pipeline definition
//!
//! Two stages, `Source` then `Build`, each with one action. Artifacts flow
//! strictly forward: every input must be produced by an earlier stage.

mod artifact;

pub use artifact::{ArtifactName, MAX_ARTIFACT_NAME_LEN};

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::naming::AppName;

pub const SOURCE_STAGE: &str = "Source";
pub const BUILD_STAGE: &str = "Build";

/// The only stage layout a pipeline may have.
pub const STAGE_ORDER: [&str; 2] = [SOURCE_STAGE, BUILD_STAGE];

pub const MAX_ACTION_NAME_LEN: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline stages must be [Source, Build], found {found:?}")]
    StageLayout { found: Vec<String> },

    #[error("stage '{0}' has no actions")]
    EmptyStage(String),

    #[error("action name '{0}' appears more than once")]
    DuplicateAction(String),

    #[error("action name '{0}' must be 1-100 characters of letters, digits, '.', '@', '_' or '-'")]
    InvalidActionName(String),

    #[error("action '{action}' in stage '{stage}' has the wrong kind {kind:?}")]
    WrongActionKind {
        stage: String,
        action: String,
        kind: ActionKind,
    },

    #[error("action '{action}' has run order 0")]
    InvalidRunOrder { action: String },

    #[error("artifact '{0}' is produced by more than one action")]
    DuplicateArtifact(String),

    #[error("action '{action}' in the first stage must not declare inputs")]
    SourceWithInputs { action: String },

    #[error("action '{action}' consumes '{artifact}', which no earlier stage produces")]
    InputNotProduced { action: String, artifact: String },

    #[error("action '{action}' must declare {expected} {direction} artifact(s), found {found}")]
    ArtifactCount {
        action: String,
        direction: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid artifact name '{0}'")]
    InvalidArtifactName(String),
}

/// What an action does and which provider runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionKind {
    GitHubSource,
    CodeBuild,
}

impl ActionKind {
    pub fn category(&self) -> &'static str {
        match self {
            ActionKind::GitHubSource => "Source",
            ActionKind::CodeBuild => "Build",
        }
    }

    pub fn owner(&self) -> &'static str {
        match self {
            ActionKind::GitHubSource => "ThirdParty",
            ActionKind::CodeBuild => "AWS",
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            ActionKind::GitHubSource => "GitHub",
            ActionKind::CodeBuild => "CodeBuild",
        }
    }

    pub fn version(&self) -> &'static str {
        "1"
    }

    fn belongs_to(&self, stage: &str) -> bool {
        self.category() == stage
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    name: String,
    kind: ActionKind,
    inputs: Vec<ArtifactName>,
    outputs: Vec<ArtifactName>,
    run_order: u32,
}

impl Action {
    pub fn new(
        name: impl Into<String>,
        kind: ActionKind,
        inputs: Vec<ArtifactName>,
        outputs: Vec<ArtifactName>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            outputs,
            run_order: 1,
        }
    }

    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn inputs(&self) -> &[ArtifactName] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ArtifactName] {
        &self.outputs
    }

    pub fn run_order(&self) -> u32 {
        self.run_order
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    name: String,
    actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

/// Ordered stages of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineDefinition {
    name: String,
    stages: Vec<Stage>,
}

impl PipelineDefinition {
    /// Unchecked; call [`PipelineDefinition::validate`] before use.
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    /// The GitHub source then docker build pipeline for `app`.
    pub fn for_app(name: impl Into<String>, app: &AppName) -> Result<Self, PipelineError> {
        let source_action = app.source_action_name();
        let build_action = app.build_action_name();
        let source_output = ArtifactName::for_action(SOURCE_STAGE, &source_action)?;
        let build_output = ArtifactName::for_action(BUILD_STAGE, &build_action)?;

        let definition = Self::new(
            name,
            vec![
                Stage::new(
                    SOURCE_STAGE,
                    vec![Action::new(
                        source_action,
                        ActionKind::GitHubSource,
                        vec![],
                        vec![source_output.clone()],
                    )],
                ),
                Stage::new(
                    BUILD_STAGE,
                    vec![Action::new(
                        build_action,
                        ActionKind::CodeBuild,
                        vec![source_output],
                        vec![build_output],
                    )],
                ),
            ],
        );
        definition.validate()?;
        Ok(definition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// The single action of a stage.
    pub fn stage_action(&self, name: &str) -> Option<&Action> {
        self.stage(name).and_then(|s| s.actions.first())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name.as_str()).collect();
        if names != STAGE_ORDER {
            return Err(PipelineError::StageLayout {
                found: names.into_iter().map(String::from).collect(),
            });
        }

        let mut action_names = HashSet::new();
        // artifact -> index of the producing stage
        let mut produced: HashMap<&str, usize> = HashMap::new();

        for (stage_index, stage) in self.stages.iter().enumerate() {
            if stage.actions.is_empty() {
                return Err(PipelineError::EmptyStage(stage.name.clone()));
            }

            for action in &stage.actions {
                validate_action_name(&action.name)?;
                if !action_names.insert(action.name.as_str()) {
                    return Err(PipelineError::DuplicateAction(action.name.clone()));
                }
                if !action.kind.belongs_to(&stage.name) {
                    return Err(PipelineError::WrongActionKind {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                        kind: action.kind,
                    });
                }
                if action.run_order == 0 {
                    return Err(PipelineError::InvalidRunOrder {
                        action: action.name.clone(),
                    });
                }

                if stage_index == 0 && !action.inputs.is_empty() {
                    return Err(PipelineError::SourceWithInputs {
                        action: action.name.clone(),
                    });
                }
                check_artifact_count(action)?;

                for input in &action.inputs {
                    match produced.get(input.as_str()) {
                        Some(&producer) if producer < stage_index => {}
                        _ => {
                            return Err(PipelineError::InputNotProduced {
                                action: action.name.clone(),
                                artifact: input.to_string(),
                            })
                        }
                    }
                }
            }

            // Outputs become visible only to later stages.
            for action in &stage.actions {
                for output in &action.outputs {
                    if produced.insert(output.as_str(), stage_index).is_some() {
                        return Err(PipelineError::DuplicateArtifact(output.to_string()));
                    }
                }
            }
        }

        Ok(())
    }
}

fn validate_action_name(name: &str) -> Result<(), PipelineError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_ACTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidActionName(name.to_string()))
    }
}

/// Source actions emit one artifact; build actions take one and emit one.
fn check_artifact_count(action: &Action) -> Result<(), PipelineError> {
    let expected_inputs = match action.kind {
        ActionKind::GitHubSource => 0,
        ActionKind::CodeBuild => 1,
    };
    let checks = [
        ("input", expected_inputs, action.inputs.len()),
        ("output", 1, action.outputs.len()),
    ];
    for (direction, expected, found) in checks {
        if expected != found {
            return Err(PipelineError::ArtifactCount {
                action: action.name.clone(),
                direction,
                expected,
                found,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppName {
        AppName::new("myapp").unwrap()
    }

    fn artifact(name: &str) -> ArtifactName {
        ArtifactName::new(name).unwrap()
    }

    fn source_stage() -> Stage {
        Stage::new(
            SOURCE_STAGE,
            vec![Action::new("src", ActionKind::GitHubSource, vec![], vec![artifact("SourceOut")])],
        )
    }

    fn build_stage() -> Stage {
        Stage::new(
            BUILD_STAGE,
            vec![Action::new(
                "build",
                ActionKind::CodeBuild,
                vec![artifact("SourceOut")],
                vec![artifact("BuildOut")],
            )],
        )
    }

    #[test]
    fn test_for_app() {
        let pipeline = PipelineDefinition::for_app("ecr-ci-pipeline", &app()).unwrap();
        let names: Vec<_> = pipeline.stages().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Source", "Build"]);

        let source = pipeline.stage_action(SOURCE_STAGE).unwrap();
        assert_eq!(source.name(), "myapp-GitHub-source-action");
        assert_eq!(
            source.outputs()[0].as_str(),
            "Artifact_Source_myapp-GitHub-source-action"
        );

        let build = pipeline.stage_action(BUILD_STAGE).unwrap();
        assert_eq!(build.name(), "myapp-docker-build-action");
        assert_eq!(build.inputs(), source.outputs());
    }

    #[test]
    fn test_valid_hand_built() {
        let pipeline = PipelineDefinition::new("p", vec![source_stage(), build_stage()]);
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_reordered_stages_rejected() {
        let pipeline = PipelineDefinition::new("p", vec![build_stage(), source_stage()]);
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::StageLayout { .. })
        ));
    }

    #[test]
    fn test_missing_stage_rejected() {
        let pipeline = PipelineDefinition::new("p", vec![source_stage()]);
        assert_eq!(
            pipeline.validate(),
            Err(PipelineError::StageLayout {
                found: vec!["Source".to_string()]
            })
        );
    }

    #[test]
    fn test_extra_stage_rejected() {
        let deploy = Stage::new("PrepareDeploy", vec![]);
        let pipeline = PipelineDefinition::new("p", vec![source_stage(), build_stage(), deploy]);
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::StageLayout { .. })
        ));
    }

    #[test]
    fn test_empty_stage_rejected() {
        let pipeline = PipelineDefinition::new("p", vec![source_stage(), Stage::new(BUILD_STAGE, vec![])]);
        assert_eq!(
            pipeline.validate(),
            Err(PipelineError::EmptyStage("Build".to_string()))
        );
    }

    #[test]
    fn test_source_with_inputs_rejected() {
        let source = Stage::new(
            SOURCE_STAGE,
            vec![Action::new(
                "src",
                ActionKind::GitHubSource,
                vec![artifact("Other")],
                vec![artifact("SourceOut")],
            )],
        );
        let pipeline = PipelineDefinition::new("p", vec![source, build_stage()]);
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::SourceWithInputs { .. })
        ));
    }

    #[test]
    fn test_input_from_nowhere_rejected() {
        let build = Stage::new(
            BUILD_STAGE,
            vec![Action::new(
                "build",
                ActionKind::CodeBuild,
                vec![artifact("Missing")],
                vec![artifact("BuildOut")],
            )],
        );
        let pipeline = PipelineDefinition::new("p", vec![source_stage(), build]);
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::InputNotProduced { .. })
        ));
    }

    #[test]
    fn test_duplicate_artifact_rejected() {
        let build = Stage::new(
            BUILD_STAGE,
            vec![Action::new(
                "build",
                ActionKind::CodeBuild,
                vec![artifact("SourceOut")],
                vec![artifact("SourceOut")],
            )],
        );
        let pipeline = PipelineDefinition::new("p", vec![source_stage(), build]);
        assert_eq!(
            pipeline.validate(),
            Err(PipelineError::DuplicateArtifact("SourceOut".to_string()))
        );
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let build = Stage::new(
            BUILD_STAGE,
            vec![Action::new(
                "src",
                ActionKind::CodeBuild,
                vec![artifact("SourceOut")],
                vec![artifact("BuildOut")],
            )],
        );
        let pipeline = PipelineDefinition::new("p", vec![source_stage(), build]);
        assert_eq!(
            pipeline.validate(),
            Err(PipelineError::DuplicateAction("src".to_string()))
        );
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let source = Stage::new(
            SOURCE_STAGE,
            vec![Action::new("src", ActionKind::CodeBuild, vec![], vec![artifact("SourceOut")])],
        );
        let pipeline = PipelineDefinition::new("p", vec![source, build_stage()]);
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::WrongActionKind { .. })
        ));
    }

    #[test]
    fn test_run_order_zero_rejected() {
        let source = Stage::new(
            SOURCE_STAGE,
            vec![
                Action::new("src", ActionKind::GitHubSource, vec![], vec![artifact("SourceOut")])
                    .with_run_order(0),
            ],
        );
        let pipeline = PipelineDefinition::new("p", vec![source, build_stage()]);
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::InvalidRunOrder { .. })
        ));
    }

    #[test]
    fn test_long_app_name_rejected_by_action_limit() {
        let app = AppName::new("a".repeat(90)).unwrap();
        assert!(matches!(
            PipelineDefinition::for_app("p", &app),
            Err(PipelineError::InvalidActionName(_))
        ));
    }

    #[test]
    fn test_action_kind_providers() {
        assert_eq!(ActionKind::GitHubSource.owner(), "ThirdParty");
        assert_eq!(ActionKind::GitHubSource.provider(), "GitHub");
        assert_eq!(ActionKind::CodeBuild.owner(), "AWS");
        assert_eq!(ActionKind::CodeBuild.category(), "Build");
    }
}
