//! The pipeline stack: every resource the CI pipeline needs, assembled from
//! a validated [`StackConfig`] and rendered to a CloudFormation template.
//!
//! Construction validates everything up front (names, pipeline layout,
//! buildspec), so [`EcrCiStack::template`] and [`EcrCiStack::synthesize`]
//! only fail on serialization or I/O.

mod logical_id;
mod manifest;
mod template;

pub use logical_id::logical_id;
pub use manifest::{canonical_sha256, SynthFile, SynthManifest, SYNTH_MANIFEST_FILE};
pub use template::LogicalIds;

use serde_json::Value;
use std::fs;
use std::path::Path;

use ecr_buildspec::{
    BuildEnvironment, BuildSpec, BuildSpecError, EnvironmentVariable, ACCOUNT_ID_VAR,
    IMAGE_REPO_NAME_VAR, REGION_VAR,
};

use crate::config::{ConfigError, EffectiveConfig, StackConfig};
use crate::naming::{AppName, RepositoryName, StackEnv};
use crate::pipeline::{PipelineDefinition, PipelineError};
use crate::policy::{build_registry_statements, PolicyStatement};
use crate::source::GitHubSource;

/// Buildspec copy written next to the template.
pub const BUILDSPEC_FILE: &str = "buildspec.yml";

#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("buildspec: {0}")]
    BuildSpec(#[from] BuildSpecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JCS canonicalization error: {0}")]
    JcsError(String),
}

#[derive(Debug, Clone)]
pub struct EcrCiStack {
    config: StackConfig,
    source: GitHubSource,
    pipeline: PipelineDefinition,
    buildspec: BuildSpec,
    environment: BuildEnvironment,
    repository: RepositoryName,
}

impl EcrCiStack {
    /// Assemble the stack. `base_dir` resolves a relative
    /// `build.buildspec_file`.
    pub fn from_config(config: StackConfig, base_dir: &Path) -> Result<Self, SynthError> {
        let pipeline = PipelineDefinition::for_app(config.pipeline_name.clone(), &config.app_name)?;
        let buildspec = config.build.load_buildspec(base_dir)?;
        let source = GitHubSource::from_config(&config.source);
        let environment = config.build.environment();
        let repository = config.app_name.repository_name();

        tracing::debug!(
            app_name = %config.app_name,
            stack = %config.stack_name,
            repository = %repository,
            trigger = %source.trigger,
            "assembled stack"
        );

        Ok(Self {
            config,
            source,
            pipeline,
            buildspec,
            environment,
            repository,
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn app_name(&self) -> &AppName {
        &self.config.app_name
    }

    pub fn stack_name(&self) -> &str {
        &self.config.stack_name
    }

    pub fn env(&self) -> &StackEnv {
        &self.config.env
    }

    pub fn source(&self) -> &GitHubSource {
        &self.source
    }

    pub fn pipeline(&self) -> &PipelineDefinition {
        &self.pipeline
    }

    pub fn buildspec(&self) -> &BuildSpec {
        &self.buildspec
    }

    pub fn environment(&self) -> &BuildEnvironment {
        &self.environment
    }

    pub fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    /// Variables the build action injects. Deferred account and region
    /// stay as pseudo parameters.
    pub fn build_variables(&self) -> Vec<EnvironmentVariable> {
        vec![
            EnvironmentVariable::plaintext(ACCOUNT_ID_VAR, self.env().account_expr()),
            EnvironmentVariable::plaintext(REGION_VAR, self.env().region_expr()),
            EnvironmentVariable::plaintext(IMAGE_REPO_NAME_VAR, self.repository.as_str()),
        ]
    }

    pub fn registry_statements(&self) -> Vec<PolicyStatement> {
        build_registry_statements(self.env(), &self.repository)
    }

    /// Registry URI of the image repository, without a tag.
    pub fn repository_uri(&self) -> String {
        self.env().repository_uri(&self.repository)
    }

    pub fn logical_ids(&self) -> LogicalIds {
        LogicalIds::for_stack(self)
    }

    /// The CloudFormation template as JSON.
    pub fn template(&self) -> Result<Value, SynthError> {
        template::render(self)
    }

    pub fn template_file_name(&self) -> String {
        format!("{}.template.json", self.config.stack_name)
    }

    /// Write the template, the buildspec and `synth_manifest.json` to
    /// `out_dir`, creating it if needed.
    pub fn synthesize(
        &self,
        out_dir: &Path,
        effective: &EffectiveConfig,
    ) -> Result<SynthManifest, SynthError> {
        fs::create_dir_all(out_dir)?;

        let template = self.template()?;
        let template_json = serde_json::to_string_pretty(&template)?;
        let template_name = self.template_file_name();
        fs::write(out_dir.join(&template_name), &template_json)?;

        let buildspec_yaml = self.buildspec.to_yaml()?;
        fs::write(out_dir.join(BUILDSPEC_FILE), &buildspec_yaml)?;

        let manifest = SynthManifest::new(self, effective, &template)?
            .with_file(&template_name, template_json.as_bytes())
            .with_file(BUILDSPEC_FILE, buildspec_yaml.as_bytes());
        manifest.write_to_file(&out_dir.join(SYNTH_MANIFEST_FILE))?;

        tracing::info!(
            out_dir = %out_dir.display(),
            template = %template_name,
            template_sha256 = %manifest.template_sha256,
            "stack synthesized"
        );
        Ok(manifest)
    }
}
