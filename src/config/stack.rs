//! Typed view of the merged configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ecr_buildspec::{docker_image_buildspec, BuildEnvironment, BuildSpec, ComputeType};

use super::effective::ConfigError;
use crate::naming::{AppName, StackEnv};
use crate::source::{TokenRef, TriggerMode};

/// Shortest and longest build timeout the build service accepts.
pub const MIN_BUILD_TIMEOUT_SECONDS: u64 = 5 * 60;
pub const MAX_BUILD_TIMEOUT_SECONDS: u64 = 8 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    pub app_name: AppName,
    pub stack_name: String,
    pub pipeline_name: String,
    #[serde(default)]
    pub env: StackEnv,
    pub source: SourceConfig,
    pub build: BuildConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub trigger: TriggerMode,
    pub token_secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_field: Option<String>,
    pub token_env: String,
}

impl SourceConfig {
    pub fn token_ref(&self) -> TokenRef {
        TokenRef {
            secret_name: self.token_secret_name.clone(),
            secret_field: self.token_secret_field.clone(),
            env_var: self.token_env.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub image: String,
    pub compute_type: ComputeType,
    pub privileged: bool,
    /// Docker runtime pinned in the install phase
    pub docker_runtime: u32,
    pub timeout_seconds: u64,
    /// Buildspec file replacing the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildspec_file: Option<PathBuf>,
}

impl BuildConfig {
    pub fn environment(&self) -> BuildEnvironment {
        BuildEnvironment {
            image: self.image.clone(),
            compute_type: self.compute_type,
            privileged: self.privileged,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Timeout rounded up to whole minutes, as the project resource takes it.
    pub fn timeout_minutes(&self) -> u64 {
        self.timeout_seconds.div_ceil(60)
    }

    /// The buildspec for this project: the configured file (relative paths
    /// resolve against `base_dir`) or the generated docker image build.
    pub fn load_buildspec(&self, base_dir: &Path) -> Result<BuildSpec, ConfigError> {
        let spec = match &self.buildspec_file {
            Some(file) => {
                let path = if file.is_absolute() {
                    file.clone()
                } else {
                    base_dir.join(file)
                };
                let text = fs::read_to_string(&path)
                    .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
                BuildSpec::from_yaml(&text)?
            }
            None => docker_image_buildspec(self.docker_runtime),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Where local runs are recorded
    pub runs_dir: PathBuf,
    pub shell: PathBuf,
}

impl StackConfig {
    /// Deserialize and validate a merged config object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value.get("app_name") {
            None | Some(Value::Null) => return Err(ConfigError::MissingAppName),
            _ => {}
        }

        let config: StackConfig = serde_json::from_value(value)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Re-run the env checks serde skipped.
        StackEnv::new(self.env.account.clone(), self.env.region.clone())?;

        if !is_valid_stack_name(&self.stack_name) {
            return Err(ConfigError::ValidationError(format!(
                "stack_name '{}' must start with a letter and contain only letters, digits and '-'",
                self.stack_name
            )));
        }
        if !is_valid_pipeline_name(&self.pipeline_name) {
            return Err(ConfigError::ValidationError(format!(
                "pipeline_name '{}' must be 1-100 characters of letters, digits, '.', '@', '_' or '-'",
                self.pipeline_name
            )));
        }

        let required = [
            ("source.owner", &self.source.owner),
            ("source.repo", &self.source.repo),
            ("source.branch", &self.source.branch),
            ("source.token_secret_name", &self.source.token_secret_name),
            ("source.token_env", &self.source.token_env),
            ("build.image", &self.build.image),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!("{} must not be empty", key)));
            }
        }

        if self.build.docker_runtime == 0 {
            return Err(ConfigError::ValidationError(
                "build.docker_runtime must be positive".to_string(),
            ));
        }
        if !(MIN_BUILD_TIMEOUT_SECONDS..=MAX_BUILD_TIMEOUT_SECONDS).contains(&self.build.timeout_seconds) {
            return Err(ConfigError::ValidationError(format!(
                "build.timeout_seconds must be in [{}, {}]",
                MIN_BUILD_TIMEOUT_SECONDS, MAX_BUILD_TIMEOUT_SECONDS
            )));
        }

        Ok(())
    }
}

fn is_valid_stack_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && name.len() <= 128
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_pipeline_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '@' | '_' | '-'))
}
